//! Application wiring: one worker per component on a shared bus.

use std::sync::Arc;
use std::time::Duration;

use crate::bdi::BdiService;
use crate::bus::worker::{TopicWorker, WorkerHandle};
use crate::bus::{EventBus, SynchronousEventBus};
use crate::config::{FriendBackend, LeolaniConfig};
use crate::context::location::{IpInfoLocator, LocationProvider};
use crate::context::{ContextService, ContextTopics};
use crate::error::LeolaniResult;
use crate::event::{Event, IntentionEvent};
use crate::friends::{DurableFriendStore, FriendStore, MemoryFriendStore};
use crate::idresolution::IdResolutionService;
use crate::intentions::{InitService, InitState, InitializeChatService};
use crate::keyword::KeywordService;
use crate::monitoring::{MonitorView, MonitoringService};
use crate::objectloc::{DummyLocator, ObjectLocationService};
use crate::reply::{CannedReplier, ReplyService};

/// Source recorded on the initial intention event.
pub const SOURCE: &str = "application";

/// Overrides for collaborators that are otherwise built from the configuration.
#[derive(Default)]
pub struct Collaborators {
    pub bus: Option<Arc<dyn EventBus>>,
    pub friends: Option<Arc<dyn FriendStore>>,
    /// `Some(None)` disables geolocation regardless of the configuration.
    pub locator: Option<Option<Arc<dyn LocationProvider>>>,
}

/// A running agent.
pub struct Application {
    bus: Arc<dyn EventBus>,
    friends: Arc<dyn FriendStore>,
    view: MonitorView,
    workers: Vec<WorkerHandle>,
    #[cfg(feature = "server")]
    server: Option<(
        tokio::sync::watch::Sender<bool>,
        tokio::task::JoinHandle<std::io::Result<()>>,
    )>,
}

impl Application {
    /// Start every component from `config`. Must run inside a tokio runtime.
    pub async fn start(config: LeolaniConfig) -> LeolaniResult<Self> {
        Self::start_with(config, Collaborators::default()).await
    }

    pub async fn start_with(config: LeolaniConfig, with: Collaborators) -> LeolaniResult<Self> {
        config.validate()?;
        let model = config.bdi.build_model()?;

        let bus = with
            .bus
            .unwrap_or_else(|| Arc::new(SynchronousEventBus::new()) as Arc<dyn EventBus>);
        let friends = match with.friends {
            Some(friends) => friends,
            None => open_friends(&config)?,
        };
        let locator = match with.locator {
            Some(locator) => locator,
            None if config.context.geolocation => Some(Arc::new(IpInfoLocator::new(
                config.context.geolocation_url.clone(),
                config.context.geolocation_timeout(),
            )) as Arc<dyn LocationProvider>),
            None => None,
        };

        let topics = &config.topics;
        let buffer = config.workers.buffer_size;
        let initial = model.initial().to_vec();
        let mut workers = Vec::new();

        workers.push(
            TopicWorker::new(BdiService::NAME, Arc::clone(&bus))
                .consumes([&topics.intention, &topics.desire])
                .provides([&topics.intention])
                .buffer_size(buffer)
                .start(BdiService::new(model, topics.intention.clone(), Arc::clone(&bus)))?,
        );

        // Scenario start waits on geolocation, so give this queue more room.
        workers.push(
            TopicWorker::new(ContextService::NAME, Arc::clone(&bus))
                .consumes([
                    &topics.intention,
                    &topics.desire,
                    &topics.speaker,
                    &topics.object,
                    &topics.vector_id,
                ])
                .provides([&topics.scenario, &topics.knowledge])
                .buffer_size(buffer.max(32))
                .start(ContextService::new(
                    ContextTopics::from(topics),
                    Arc::clone(&friends),
                    locator,
                    config.context.geolocation_timeout(),
                    Arc::clone(&bus),
                ))?,
        );

        workers.push(
            TopicWorker::new(IdResolutionService::NAME, Arc::clone(&bus))
                .consumes([&topics.speaker, &topics.scenario])
                .provides([&topics.knowledge])
                .buffer_size(buffer)
                .start(IdResolutionService::new(
                    Arc::clone(&friends),
                    config.idresolution.max_attempts,
                    config.idresolution.retry_interval(),
                    topics.knowledge.clone(),
                    Arc::clone(&bus),
                ))?,
        );

        workers.push(
            TopicWorker::new(InitService::NAME, Arc::clone(&bus))
                .consumes([&topics.text_in])
                .observes([&topics.scenario])
                .provides([&topics.desire, &topics.text_out])
                .gated(&topics.intention, [crate::bdi::INIT])
                .scheduled(Duration::from_secs(config.init.tick_secs))
                .buffer_size(buffer)
                .start(InitService::new(
                    InitState::new(config.init.greeting.clone(), config.init.timeout_ms),
                    topics.desire.clone(),
                    topics.text_out.clone(),
                    Arc::clone(&bus),
                ))?,
        );

        let mut chat = TopicWorker::new(InitializeChatService::NAME, Arc::clone(&bus))
            .consumes([&topics.scenario, &topics.intention, &topics.text_in])
            .provides([&topics.speaker_mention])
            .buffer_size(buffer);
        if let Some(interval) = config.chat.init_interval_ms {
            chat = chat.scheduled(Duration::from_millis((interval / 2).max(1)));
        }
        workers.push(chat.start(InitializeChatService::new(
            config.chat.intention.clone(),
            config.chat.init_interval_ms,
            topics.speaker_mention.clone(),
            Arc::clone(&bus),
        ))?);

        workers.push(
            TopicWorker::new(KeywordService::NAME, Arc::clone(&bus))
                .consumes([&topics.text_in])
                .observes([&topics.scenario])
                .provides([&topics.desire, &topics.text_out])
                .gated(&topics.intention, [config.chat.intention.clone()])
                .buffer_size(buffer)
                .start(KeywordService::new(
                    topics.desire.clone(),
                    topics.text_out.clone(),
                    Arc::clone(&bus),
                ))?,
        );

        workers.push(
            TopicWorker::new(ReplyService::<CannedReplier>::NAME, Arc::clone(&bus))
                .consumes([&topics.text_in, &topics.scenario])
                .provides([&topics.text_out])
                .buffer_size(buffer)
                .start(ReplyService::new(
                    CannedReplier,
                    topics.text_out.clone(),
                    Arc::clone(&bus),
                ))?,
        );

        if config.objectloc.enabled {
            workers.push(
                TopicWorker::new(ObjectLocationService::<DummyLocator>::NAME, Arc::clone(&bus))
                    .consumes([&topics.image, &topics.object, &topics.text_in, &topics.scenario])
                    .provides([&topics.text_out])
                    .buffer_size(8)
                    .start(ObjectLocationService::new(
                        DummyLocator,
                        config.objectloc.cache_size,
                        topics.text_out.clone(),
                        Arc::clone(&bus),
                    ))?,
            );
        }

        let view = MonitorView::new();
        workers.push(
            TopicWorker::new(MonitoringService::NAME, Arc::clone(&bus))
                .consumes([
                    &topics.text_in,
                    &topics.text_out,
                    &topics.image,
                    &topics.object,
                    &topics.vector_id,
                ])
                .buffer_size(buffer)
                .start(MonitoringService::new(view.clone(), Arc::clone(&friends)))?,
        );

        #[cfg(feature = "server")]
        let server = if config.monitoring.enabled {
            Some(start_server(&config, view.clone()).await?)
        } else {
            None
        };

        tracing::info!(workers = workers.len(), ?initial, "application started");
        bus.publish(
            &topics.intention,
            Event::for_payload(IntentionEvent::new(initial)).with_source(SOURCE),
        );

        Ok(Self {
            bus,
            friends,
            view,
            workers,
            #[cfg(feature = "server")]
            server,
        })
    }

    pub fn bus(&self) -> &Arc<dyn EventBus> {
        &self.bus
    }

    pub fn friends(&self) -> &Arc<dyn FriendStore> {
        &self.friends
    }

    pub fn view(&self) -> &MonitorView {
        &self.view
    }

    /// Stop the HTTP view and every worker, waiting for each to finish.
    pub async fn stop(self) {
        #[cfg(feature = "server")]
        if let Some((shutdown, task)) = self.server {
            if shutdown.send(true).is_err() {
                tracing::debug!("monitoring server already exited");
            }
            match task.await {
                Ok(Err(e)) => tracing::warn!(error = %e, "monitoring server failed"),
                Err(e) => tracing::warn!(error = %e, "monitoring server panicked"),
                Ok(Ok(())) => {}
            }
        }
        for worker in self.workers {
            worker.stop().await;
        }
        tracing::info!("application stopped");
    }
}

fn open_friends(config: &LeolaniConfig) -> LeolaniResult<Arc<dyn FriendStore>> {
    Ok(match config.friends.backend {
        FriendBackend::Memory => Arc::new(MemoryFriendStore::new()),
        FriendBackend::Durable => Arc::new(DurableFriendStore::open(&config.friends_dir()?)?),
    })
}

#[cfg(feature = "server")]
async fn start_server(
    config: &LeolaniConfig,
    view: MonitorView,
) -> LeolaniResult<(
    tokio::sync::watch::Sender<bool>,
    tokio::task::JoinHandle<std::io::Result<()>>,
)> {
    let addr = format!("{}:{}", config.monitoring.bind, config.monitoring.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| crate::error::MonitoringError::Bind { addr, source })?;
    let (tx, rx) = tokio::sync::watch::channel(false);
    let task = tokio::spawn(crate::monitoring::serve(listener, view, rx));
    Ok((tx, task))
}
