//! Main controller implementation.
//!
//! Composition root: builds the state container, merge engine, telemetry
//! buffer, dispatch table and reconcilers once, then runs the watchers,
//! the admission webhook and the pipeline loops until shutdown.

use std::sync::Arc;

use crds::{AgentConfiguration, AgentConnection, AgentInjector, ClusterAgentInjector};
use injector_core::pipeline::{
    run_reactions, run_state_events, run_ticks, StateModifiedMerger,
};
use injector_core::resources::{
    AgentConfigurationResource, AgentConnectionResource, AgentInjectorResource,
    ClusterAgentInjectorResource, DaemonSetResource, DeploymentResource, NamespaceResource,
    PodResource, SecretResource, StatefulSetResource,
};
use injector_core::{
    leader_channel, telemetry_channel, ClusterTemplateReconciler, ClusterWriter, DispatchTable,
    InjectionReconciler, InjectionResolver, MergeEngine, PatcherTable, Resource, ResourceKind,
    StateContainer, WriteGate,
};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret};
use kube::api::DynamicObject;
use kube::{Api, Client};
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::watcher::{deployment_config, Watcher};
use crate::webhook::{self, WebhookState};
use crate::writer::{deployment_config_resource, KubeClusterWriter};

type Task = (String, JoinHandle<Result<(), ControllerError>>);

/// Main controller for agent injection.
#[derive(Debug)]
pub struct Controller {
    tasks: Vec<Task>,
    loops: Vec<JoinHandle<()>>,
    telemetry_drain: JoinHandle<()>,
    leader: watch::Sender<bool>,
    shutdown: watch::Sender<bool>,
}

fn scoped<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

fn spawn_watcher<K>(
    api: Api<K>,
    kind: ResourceKind,
    state: &Arc<StateContainer>,
    normalize: fn(&K) -> Resource,
) -> Task
where
    K: kube::Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + Sync + 'static,
{
    let watcher = Watcher::new(api, kind, Arc::clone(state), normalize);
    (format!("{} watcher", kind), tokio::spawn(watcher.run()))
}

impl Controller {
    /// Creates a new controller instance and starts its background tasks.
    pub async fn new(config: OperatorConfig) -> Result<Self, ControllerError> {
        info!("Initializing Agent Injector Controller");

        let client = Client::try_default().await?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (reactions_tx, reactions_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (telemetry, telemetry_rx) = telemetry_channel(config.telemetry_buffer_capacity);
        let (leader_tx, leader) = leader_channel(config.leader);

        let state = Arc::new(StateContainer::new(config.settle_duration, Some(events_tx)));
        let merge = Arc::new(MergeEngine::new(config.merge_window));
        let gate = WriteGate::new(leader.clone(), Arc::clone(&state));
        let writer: Arc<dyn ClusterWriter> = Arc::new(KubeClusterWriter::new(client.clone()));

        let dispatch = Arc::new(
            DispatchTable::builder()
                .on_state_modified(Arc::new(StateModifiedMerger::new(
                    Arc::clone(&merge),
                    reactions_tx.clone(),
                )))
                .on_deferred_reaction(Arc::new(ClusterTemplateReconciler::new(
                    Arc::clone(&state),
                    Arc::clone(&writer),
                    gate.clone(),
                )))
                .on_deferred_reaction(Arc::new(InjectionReconciler::new(
                    Arc::clone(&state),
                    Arc::clone(&writer),
                    gate,
                )))
                .handle_resolve_injection(Arc::new(InjectionResolver::new(Arc::clone(&state))))
                .with_telemetry(telemetry)
                .build()?,
        );

        let ns = config.watch_namespace.as_deref();
        let mut tasks = vec![
            spawn_watcher(
                scoped::<AgentInjector>(&client, ns),
                ResourceKind::AgentInjector,
                &state,
                |o| Resource::AgentInjector(AgentInjectorResource::from(o)),
            ),
            spawn_watcher(
                Api::<ClusterAgentInjector>::all(client.clone()),
                ResourceKind::ClusterAgentInjector,
                &state,
                |o| Resource::ClusterAgentInjector(ClusterAgentInjectorResource::from(o)),
            ),
            spawn_watcher(
                scoped::<AgentConnection>(&client, ns),
                ResourceKind::AgentConnection,
                &state,
                |o| Resource::AgentConnection(AgentConnectionResource::from(o)),
            ),
            spawn_watcher(
                scoped::<AgentConfiguration>(&client, ns),
                ResourceKind::AgentConfiguration,
                &state,
                |o| Resource::AgentConfiguration(AgentConfigurationResource::from(o)),
            ),
            spawn_watcher(
                scoped::<Secret>(&client, ns),
                ResourceKind::Secret,
                &state,
                |o| Resource::Secret(SecretResource::from(o)),
            ),
            spawn_watcher(
                Api::<Namespace>::all(client.clone()),
                ResourceKind::Namespace,
                &state,
                |o| Resource::Namespace(NamespaceResource::from(o)),
            ),
            spawn_watcher(
                scoped::<Deployment>(&client, ns),
                ResourceKind::Deployment,
                &state,
                |o| Resource::Deployment(DeploymentResource::from(o)),
            ),
            spawn_watcher(
                scoped::<DaemonSet>(&client, ns),
                ResourceKind::DaemonSet,
                &state,
                |o| Resource::DaemonSet(DaemonSetResource::from(o)),
            ),
            spawn_watcher(
                scoped::<StatefulSet>(&client, ns),
                ResourceKind::StatefulSet,
                &state,
                |o| Resource::StatefulSet(StatefulSetResource::from(o)),
            ),
            spawn_watcher(
                scoped::<Pod>(&client, ns),
                ResourceKind::Pod,
                &state,
                |o| Resource::Pod(PodResource::from(o)),
            ),
        ];

        if config.enable_openshift {
            let resource = deployment_config_resource();
            let api: Api<DynamicObject> = match ns {
                Some(ns) => Api::namespaced_with(client.clone(), ns, &resource),
                None => Api::all_with(client.clone(), &resource),
            };
            tasks.push(spawn_watcher(
                api,
                ResourceKind::DeploymentConfig,
                &state,
                deployment_config,
            ));
        }

        if let Some(webhook_config) = config.webhook.clone() {
            let webhook_state = Arc::new(WebhookState::new(
                Arc::clone(&dispatch),
                Arc::new(PatcherTable::with_defaults()),
                Arc::clone(&state),
            ));
            tasks.push((
                "Admission webhook".to_string(),
                tokio::spawn(webhook::serve(webhook_config, webhook_state)),
            ));
        }

        let loops = vec![
            tokio::spawn(run_state_events(
                events_rx,
                Arc::clone(&dispatch),
                shutdown_rx.clone(),
            )),
            tokio::spawn(run_ticks(
                merge,
                Arc::clone(&state),
                leader,
                config.tick_interval,
                reactions_tx,
                shutdown_rx.clone(),
            )),
            tokio::spawn(run_reactions(reactions_rx, dispatch, shutdown_rx)),
        ];
        let telemetry_drain = tokio::spawn(telemetry_rx.drain());

        Ok(Self {
            tasks,
            loops,
            telemetry_drain,
            leader: leader_tx,
            shutdown,
        })
    }

    /// Runs the controller until Ctrl-C or a watcher or webhook failure.
    pub async fn run(self) -> Result<(), ControllerError> {
        info!("Agent Injector Controller running");

        let Self {
            tasks,
            loops,
            telemetry_drain,
            leader,
            shutdown,
        } = self;

        let (names, handles): (Vec<String>, Vec<_>) = tasks.into_iter().unzip();
        let mut first_exit = futures::future::select_all(handles);

        let outcome = tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.map_err(|e| {
                    ControllerError::Watch(format!("Failed to listen for shutdown signal: {}", e))
                })?;
                info!("Shutdown requested");
                Ok(())
            }
            (result, index, _) = &mut first_exit => {
                let name = names.get(index).map_or("unknown task", String::as_str);
                match result {
                    Ok(Ok(())) => Err(ControllerError::Watch(format!("{} stopped", name))),
                    Ok(Err(e)) => Err(e),
                    Err(e) => Err(ControllerError::Watch(format!("{} panicked: {}", name, e))),
                }
            }
        };

        // no writes once shutdown has begun
        leader.send_replace(false);
        if shutdown.send(true).is_err() {
            warn!("Pipeline loops already stopped");
        }
        for handle in loops {
            if let Err(e) = handle.await {
                warn!("Pipeline loop ended abnormally: {}", e);
            }
        }
        for handle in first_exit.into_inner() {
            handle.abort();
        }
        telemetry_drain.abort();

        outcome
    }
}
