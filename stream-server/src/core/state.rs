use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::bus::{DurableTopic, EventBus};
use crate::core::tasks::{BackgroundTasks, TaskKind};
use crate::core::{Config, Result};
use crate::producer::EventPublisher;
use crate::storage::{self, EventLogStore, SnapshotStore, StoreResult, blocking};

/// Rows removed by one retention sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub streams: usize,
    pub snapshots: usize,
    pub topic_messages: usize,
}

/// 服务器状态 - 持有所有服务的共享引用
///
/// 所有字段都是 Arc 或可廉价克隆的句柄。
///
/// | 字段 | 说明 |
/// |------|------|
/// | config | 配置项 (不可变) |
/// | event_log | 事件流存储 (events.redb) |
/// | snapshots | 执行快照存储 (events.redb) |
/// | bus | durable topic + router + 订阅表 (bus.redb) |
/// | publisher | 生产者入口 |
#[derive(Clone)]
pub struct ServerState {
    pub config: Config,
    pub event_log: EventLogStore,
    pub snapshots: SnapshotStore,
    pub bus: EventBus,
    pub publisher: EventPublisher,
    pub started_at: Instant,
    shutdown: CancellationToken,
}

impl ServerState {
    fn assemble(
        config: Config,
        event_log: EventLogStore,
        snapshots: SnapshotStore,
        topic: Arc<DurableTopic>,
    ) -> Self {
        let bus = EventBus::new(Arc::clone(&topic), &config.bus_config());
        let publisher = EventPublisher::new(event_log.clone(), snapshots.clone(), topic);
        Self {
            config,
            event_log,
            snapshots,
            bus,
            publisher,
            started_at: Instant::now(),
            shutdown: CancellationToken::new(),
        }
    }

    /// 初始化服务器状态
    ///
    /// Opens `{work_dir}/events.redb` and `{work_dir}/bus.redb`.
    pub async fn initialize(config: &Config) -> Result<Self> {
        let events_path = config.events_db_path();
        let bus_path = config.bus_db_path();
        let event_retention = config.event_retention;
        let snapshot_retention = config.snapshot_retention;

        let (event_log, snapshots, topic) = blocking(move || {
            let events_db = storage::open_database(&events_path)?;
            let bus_db = storage::open_database(&bus_path)?;
            Ok((
                EventLogStore::new(Arc::clone(&events_db), event_retention)?,
                SnapshotStore::new(events_db, snapshot_retention)?,
                DurableTopic::new(bus_db)?,
            ))
        })
        .await?;

        tracing::info!(work_dir = %config.work_dir, "Storage opened");
        Ok(Self::assemble(config.clone(), event_log, snapshots, Arc::new(topic)))
    }

    /// State backed by one in-memory database
    pub fn in_memory(config: Config) -> Result<Self> {
        let db = storage::open_in_memory()?;
        let event_log = EventLogStore::new(Arc::clone(&db), config.event_retention)?;
        let snapshots = SnapshotStore::new(Arc::clone(&db), config.snapshot_retention)?;
        let topic = Arc::new(DurableTopic::new(db)?);
        Ok(Self::assemble(config, event_log, snapshots, topic))
    }

    /// Cancelled once at shutdown; open SSE sessions end on it
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// 启动后台任务: event router + retention sweeper
    pub fn start_background_tasks(&self) -> BackgroundTasks {
        let mut tasks = BackgroundTasks::new(self.shutdown.clone());

        let router = Arc::clone(self.bus.router());
        let token = tasks.shutdown_token();
        tasks.spawn("event_router", TaskKind::Worker, async move {
            router.run(token).await;
        });

        let state = self.clone();
        let token = tasks.shutdown_token();
        let interval = self.config.sweep_interval;
        tasks.spawn("retention_sweeper", TaskKind::Periodic, async move {
            state.sweep_loop(interval, token).await;
        });

        tasks.log_summary();
        tasks
    }

    async fn sweep_loop(&self, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // first tick fires immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self.run_retention_sweep().await {
                Ok(stats) if stats != SweepStats::default() => {
                    tracing::info!(
                        streams = stats.streams,
                        snapshots = stats.snapshots,
                        topic_messages = stats.topic_messages,
                        "Retention sweep removed expired data"
                    );
                }
                Ok(_) => tracing::trace!("Retention sweep found nothing to remove"),
                Err(e) => tracing::warn!(error = %e, "Retention sweep failed"),
            }
        }
    }

    /// Remove expired streams and snapshots, trim acknowledged topic messages
    pub async fn run_retention_sweep(&self) -> StoreResult<SweepStats> {
        let event_log = self.event_log.clone();
        let snapshots = self.snapshots.clone();
        let topic = Arc::clone(self.bus.topic());

        blocking(move || {
            Ok(SweepStats {
                streams: event_log.purge_expired()?,
                snapshots: snapshots.purge_expired()?,
                topic_messages: topic.trim_acknowledged()?,
            })
        })
        .await
    }
}
