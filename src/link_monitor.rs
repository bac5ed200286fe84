use crate::app::AppContext;
use crate::publisher::{PublisherCommand, RestartReason};
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;

const LINK_LOST: [&str; 2] = ["+CMQTTCONNLOST", "+CMQTTNONET"];

/// Passive listener for broker link loss reported by the modem.
pub struct LinkMonitor {
    ctx: Arc<AppContext>,
    publisher: Sender<PublisherCommand>,
}

impl LinkMonitor {
    pub fn new(ctx: Arc<AppContext>, publisher: Sender<PublisherCommand>) -> Self {
        Self { ctx, publisher }
    }

    pub fn run(&self, running: &AtomicBool) {
        info!("LinkMonitor: started");
        let interval = Duration::from_millis(self.ctx.config.schedule.link_poll_interval_ms);
        while running.load(Ordering::Relaxed) {
            self.poll();
            std::thread::sleep(interval);
        }
        info!("LinkMonitor: stopped");
    }

    /// Listen briefly if the modem is idle and act on queued notifications. Returns
    /// whether link loss was detected.
    pub fn poll(&self) -> bool {
        let notifications = {
            let Some(mut engine) = self.ctx.modem.try_lock() else {
                return false;
            };
            engine.poll_notifications(Duration::from_millis(
                self.ctx.config.schedule.link_listen_ms,
            ));
            engine.take_notifications()
        };

        let lost = notifications
            .iter()
            .any(|note| LINK_LOST.iter().any(|prefix| note.starts_with(prefix)));
        if lost {
            warn!("🔌 LinkMonitor: broker link lost");
            self.ctx.mqtt.mark_link_lost();
            if self
                .publisher
                .send(PublisherCommand::Restart(RestartReason::LinkLost))
                .is_err()
            {
                warn!("LinkMonitor: publisher is gone");
            }
        }
        lost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::SessionState;
    use crate::platform::mock::mock_context;
    use std::sync::mpsc;

    #[test]
    fn test_connection_lost_triggers_restart() {
        let (ctx, rig) = mock_context();
        let (tx, rx) = mpsc::channel();
        let monitor = LinkMonitor::new(Arc::clone(&ctx), tx);

        assert!(!monitor.poll());
        rig.script.unsolicited("\r\n+CMQTTCONNLOST: 0,1\r\n");
        assert!(monitor.poll());

        assert_eq!(ctx.mqtt.state(), SessionState::Disconnected);
        assert_eq!(
            rx.try_recv(),
            Ok(PublisherCommand::Restart(RestartReason::LinkLost))
        );
    }

    #[test]
    fn test_notification_seen_during_exchange_is_not_lost() {
        let (ctx, rig) = mock_context();
        let (tx, rx) = mpsc::channel();
        let monitor = LinkMonitor::new(Arc::clone(&ctx), tx);

        rig.script.on("AT", "\r\n+CMQTTNONET\r\nOK\r\n");
        assert!(ctx.modem.execute("AT", "OK", Duration::from_millis(40)));
        assert!(monitor.poll());
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_busy_modem_is_left_alone() {
        let (ctx, rig) = mock_context();
        let (tx, rx) = mpsc::channel();
        let monitor = LinkMonitor::new(Arc::clone(&ctx), tx);

        rig.script.unsolicited("\r\n+CMQTTNONET\r\n");
        let guard = ctx.modem.lock();
        assert!(!monitor.poll());
        drop(guard);
        assert!(rx.try_recv().is_err());
        assert!(monitor.poll());
    }

    #[test]
    fn test_other_notifications_ignored() {
        let (ctx, rig) = mock_context();
        let (tx, rx) = mpsc::channel();
        let monitor = LinkMonitor::new(ctx, tx);

        rig.script.unsolicited("\r\nSMS DONE\r\n+CPIN: READY\r\n");
        assert!(!monitor.poll());
        assert!(rx.try_recv().is_err());
    }
}
