//! Best-effort persistence and stats updates for broadcast messages.
//!
//! Broadcasts are queued on a bounded backlog drained by a fixed set of
//! workers, so a slow store never holds up the hub and pending work cannot
//! grow without limit. Every outcome, including a message dropped because the
//! backlog was full, is sent on a report channel so failures are observable
//! beyond a log line. Nothing is retried.

use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, Semaphore};
use uuid::Uuid;

use crate::error::StoreError;
use crate::messages::ChatMessage;
use crate::store::{Achievement, MessageStore, NewMessage, StatsStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineReport {
    Persisted { room_id: String, message_id: Uuid },
    PersistFailed { room_id: String, error: StoreError },
    MessageCounted { user_id: Uuid },
    CountFailed { user_id: Uuid, error: StoreError },
    AchievementsChecked { user_id: Uuid, awarded: Vec<Achievement> },
    AchievementCheckFailed { user_id: Uuid, error: StoreError },
    Dropped { room_id: String },
}

pub const BACKLOG_PER_WORKER: usize = 64;

#[derive(Clone)]
pub struct Pipeline {
    jobs: mpsc::Sender<Arc<ChatMessage>>,
    reports: mpsc::UnboundedSender<PipelineReport>,
}

struct Worker {
    messages: Arc<dyn MessageStore>,
    stats: Arc<dyn StatsStore>,
    checks: Arc<Semaphore>,
    reports: mpsc::UnboundedSender<PipelineReport>,
}

impl Pipeline {
    /// Starts `workers` workers with a backlog of [`BACKLOG_PER_WORKER`] per worker.
    pub fn new(
        messages: Arc<dyn MessageStore>,
        stats: Arc<dyn StatsStore>,
        workers: usize,
    ) -> (Self, mpsc::UnboundedReceiver<PipelineReport>) {
        let backlog = workers.max(1) * BACKLOG_PER_WORKER;
        Self::with_backlog(messages, stats, workers, backlog)
    }

    /// Must be called from within a tokio runtime; the workers are spawned
    /// here and stop once every clone of the pipeline is dropped and the
    /// backlog is drained.
    pub fn with_backlog(
        messages: Arc<dyn MessageStore>,
        stats: Arc<dyn StatsStore>,
        workers: usize,
        backlog: usize,
    ) -> (Self, mpsc::UnboundedReceiver<PipelineReport>) {
        let workers = workers.max(1);
        let (reports, receiver) = mpsc::unbounded_channel();
        let (jobs, queue) = mpsc::channel(backlog.max(1));
        let queue = Arc::new(Mutex::new(queue));

        let worker = Arc::new(Worker {
            messages,
            stats,
            checks: Arc::new(Semaphore::new(workers)),
            reports: reports.clone(),
        });
        for _ in 0..workers {
            tokio::spawn(Arc::clone(&worker).run(Arc::clone(&queue)));
        }

        (Pipeline { jobs, reports }, receiver)
    }

    /// Queues the side effects for one message without waiting. When the
    /// backlog is full the message is dropped and reported.
    pub fn dispatch(&self, message: Arc<ChatMessage>) {
        match self.jobs.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(message)) => {
                warn!("Side-effect backlog full, dropping message for room {}", message.room_id);
                let _ = self.reports.send(PipelineReport::Dropped {
                    room_id: message.room_id.clone(),
                });
            }
            Err(TrySendError::Closed(_)) => debug!("Side-effect workers have stopped"),
        }
    }
}

impl Worker {
    async fn run(self: Arc<Self>, queue: Arc<Mutex<mpsc::Receiver<Arc<ChatMessage>>>>) {
        loop {
            let next = queue.lock().await.recv().await;
            let Some(message) = next else {
                break;
            };
            self.process(&message).await;
        }
    }

    async fn process(self: &Arc<Self>, message: &ChatMessage) {
        match self.messages.append_message(NewMessage::from(message)).await {
            Ok(stored) => self.report(PipelineReport::Persisted {
                room_id: stored.room_id,
                message_id: stored.id,
            }),
            Err(error) => {
                error!("Failed to persist message for room {}: {}", message.room_id, error);
                self.report(PipelineReport::PersistFailed {
                    room_id: message.room_id.clone(),
                    error,
                });
            }
        }

        let Some(user_id) = message.user_id else {
            return;
        };

        match self.stats.increment_message_count(user_id).await {
            Ok(()) => {
                self.report(PipelineReport::MessageCounted { user_id });
                self.spawn_achievement_check(user_id).await;
            }
            Err(error) => {
                warn!("Failed to update message count for user {}: {}", user_id, error);
                self.report(PipelineReport::CountFailed { user_id, error });
            }
        }
    }

    /// Runs the check as its own task. The worker waits for a permit first,
    /// so at most one check per worker is outstanding.
    async fn spawn_achievement_check(self: &Arc<Self>, user_id: Uuid) {
        let Ok(permit) = Arc::clone(&self.checks).acquire_owned().await else {
            return;
        };
        let worker = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = permit;
            match worker.stats.check_and_award_achievements(user_id).await {
                Ok(awarded) => {
                    worker.report(PipelineReport::AchievementsChecked { user_id, awarded });
                }
                Err(error) => {
                    warn!("Error checking achievements for user {}: {}", user_id, error);
                    worker.report(PipelineReport::AchievementCheckFailed { user_id, error });
                }
            }
        });
    }

    fn report(&self, report: PipelineReport) {
        // Nobody listening is fine; the failure paths have already logged.
        let _ = self.reports.send(report);
    }
}

/// Drains the report channel for the lifetime of the process.
pub async fn supervise(mut reports: mpsc::UnboundedReceiver<PipelineReport>) {
    let mut failures: u64 = 0;
    while let Some(report) = reports.recv().await {
        match report {
            PipelineReport::Persisted { room_id, message_id } => {
                debug!("Persisted message {} in room {}", message_id, room_id);
            }
            PipelineReport::MessageCounted { user_id } => {
                debug!("Counted message for user {}", user_id);
            }
            PipelineReport::AchievementsChecked { user_id, awarded } => {
                for achievement in awarded {
                    info!("User {} earned achievement {}", user_id, achievement.name);
                }
            }
            PipelineReport::PersistFailed { .. }
            | PipelineReport::Dropped { .. }
            | PipelineReport::CountFailed { .. }
            | PipelineReport::AchievementCheckFailed { .. } => {
                failures += 1;
                debug!("Side-effect failures so far: {}", failures);
            }
        }
    }
    debug!("Pipeline report channel closed after {} failures", failures);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::messages::Identity;
    use crate::store::{MemoryMessageStore, MemoryStatsStore};

    async fn next(reports: &mut mpsc::UnboundedReceiver<PipelineReport>) -> PipelineReport {
        tokio::time::timeout(Duration::from_secs(2), reports.recv())
            .await
            .expect("report in time")
            .expect("channel open")
    }

    #[tokio::test]
    async fn anonymous_message_is_persisted_without_stats() {
        let messages = Arc::new(MemoryMessageStore::new());
        let stats = Arc::new(MemoryStatsStore::new());
        let (pipeline, mut reports) = Pipeline::new(messages.clone(), stats, 4);

        let sender = Identity::new(Some("guest".to_string()), Some("bob".to_string()));
        pipeline.dispatch(Arc::new(ChatMessage::from_sender(&sender, "r1", "hi".to_string())));

        assert!(matches!(
            next(&mut reports).await,
            PipelineReport::Persisted { room_id, .. } if room_id == "r1"
        ));
        drop(pipeline);
        assert!(reports.recv().await.is_none());
        assert_eq!(messages.recent_messages("r1", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn authenticated_message_counts_then_awards() {
        let messages = Arc::new(MemoryMessageStore::new());
        let stats = Arc::new(MemoryStatsStore::new());
        let (pipeline, mut reports) = Pipeline::new(messages, stats.clone(), 1);

        let user = Uuid::new_v4();
        let sender = Identity::new(Some(user.to_string()), Some("ada".to_string()));
        pipeline.dispatch(Arc::new(ChatMessage::from_sender(&sender, "r1", "hi".to_string())));

        assert!(matches!(next(&mut reports).await, PipelineReport::Persisted { .. }));
        assert_eq!(next(&mut reports).await, PipelineReport::MessageCounted { user_id: user });
        match next(&mut reports).await {
            PipelineReport::AchievementsChecked { user_id, awarded } => {
                assert_eq!(user_id, user);
                assert_eq!(awarded[0].key, "first_message");
            }
            other => panic!("unexpected report {other:?}"),
        }
        assert_eq!(stats.user_stats(user).await.total_messages, 1);
    }

    #[tokio::test]
    async fn full_backlog_drops_and_reports() {
        let messages = Arc::new(MemoryMessageStore::new());
        let stats = Arc::new(MemoryStatsStore::new());
        let (pipeline, mut reports) = Pipeline::with_backlog(messages.clone(), stats, 1, 1);

        let sender = Identity::new(Some("guest".to_string()), Some("bob".to_string()));
        for content in ["one", "two", "three"] {
            pipeline.dispatch(Arc::new(ChatMessage::from_sender(&sender, "r1", content.to_string())));
        }

        let dropped = PipelineReport::Dropped {
            room_id: "r1".to_string(),
        };
        assert_eq!(next(&mut reports).await, dropped);
        assert_eq!(next(&mut reports).await, dropped);
        assert!(matches!(next(&mut reports).await, PipelineReport::Persisted { .. }));

        let stored = messages.recent_messages("r1", 10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "one");
    }
}
