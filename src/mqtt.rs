use crate::config::Timeouts;
use crate::modem::{Completion, SharedModem};
use crate::secure::staged_upload;
use log::{info, warn};
use std::sync::Mutex;

/// Client slot 0 as the modem's MQTT stack sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Started,
    ClientAcquired,
    SslBound,
    Connected,
    Disconnected,
    ClientReleased,
}

#[derive(Debug, Clone, Copy)]
pub struct MqttStatus {
    pub state: SessionState,
    pub publish_count: u32,
    pub failed_publish_count: u32,
}

impl Default for MqttStatus {
    fn default() -> Self {
        Self {
            state: SessionState::Stopped,
            publish_count: 0,
            failed_publish_count: 0,
        }
    }
}

/// Broker session driven through the modem's `AT+CMQTT*` commands.
///
/// State only advances on success. Commands are never refused based on the tracked
/// state; the modem is the authority.
pub struct MqttSession {
    modem: SharedModem,
    timeouts: Timeouts,
    client_id: String,
    status: Mutex<MqttStatus>,
}

impl MqttSession {
    pub fn new(modem: SharedModem, timeouts: Timeouts, client_id: &str) -> Self {
        Self {
            modem,
            timeouts,
            client_id: client_id.to_string(),
            status: Mutex::new(MqttStatus::default()),
        }
    }

    pub fn state(&self) -> SessionState {
        crate::lock(&self.status).state
    }

    pub fn status(&self) -> MqttStatus {
        *crate::lock(&self.status)
    }

    /// The modem reported the broker link gone.
    pub fn mark_link_lost(&self) {
        let mut status = crate::lock(&self.status);
        if status.state != SessionState::Disconnected {
            warn!("🔌 MQTT: link lost (was {:?})", status.state);
        }
        status.state = SessionState::Disconnected;
    }

    pub fn begin(&self) -> bool {
        self.step("AT+CMQTTSTART", "OK", self.timeouts.standard(), SessionState::Started)
    }

    pub fn acquire_client(&self) -> bool {
        let command = format!("AT+CMQTTACCQ=0,\"{}\",1", self.client_id);
        self.step(&command, "OK", self.timeouts.standard(), SessionState::ClientAcquired)
    }

    pub fn set_ssl_context(&self) -> bool {
        self.step("AT+CMQTTSSLCFG=0,0", "OK", self.timeouts.standard(), SessionState::SslBound)
    }

    /// Connect with keepalive 60 s and a clean session. Only an outcome of `0,0` counts.
    pub fn connect(&self, server: &str, port: u16) -> bool {
        let command = format!("AT+CMQTTCONNECT=0,\"{}:{}\",60,1", server, port);
        info!("MQTT: connecting to {}:{}", server, port);

        let response = self.modem.lock().exchange(
            &command,
            "+CMQTTCONNECT:",
            self.timeouts.connect(),
            Completion::Token,
        );
        let outcome = response
            .find("+CMQTTCONNECT:")
            .and_then(parse_connect_code);

        match outcome {
            Some((0, 0)) => {
                info!("✅ MQTT connected");
                self.set_state(SessionState::Connected);
                true
            }
            Some((client, code)) => {
                warn!("❌ MQTT connect refused (client {}, code {})", client, code);
                false
            }
            None => {
                warn!("❌ MQTT connect: no outcome within {:?}", self.timeouts.connect());
                false
            }
        }
    }

    pub fn disconnect(&self) -> bool {
        self.step(
            "AT+CMQTTDISC=0,60",
            "OK",
            self.timeouts.standard(),
            SessionState::Disconnected,
        )
    }

    pub fn release_client(&self) -> bool {
        self.step("AT+CMQTTREL=0", "OK", self.timeouts.release(), SessionState::ClientReleased)
    }

    pub fn end(&self) -> bool {
        self.step("AT+CMQTTSTOP", "OK", self.timeouts.standard(), SessionState::Stopped)
    }

    /// Load topic and payload into the modem's outgoing buffers. Both uploads are
    /// always attempted.
    pub fn stage_topic_and_payload(&self, topic: &str, payload: &str) -> bool {
        let mut engine = self.modem.lock();
        let topic_ok = staged_upload(
            &mut engine,
            &format!("AT+CMQTTTOPIC=0,{}", topic.len()),
            topic.as_bytes(),
            &self.timeouts,
        );
        let payload_ok = staged_upload(
            &mut engine,
            &format!("AT+CMQTTPAYLOAD=0,{}", payload.len()),
            payload.as_bytes(),
            &self.timeouts,
        );

        if !topic_ok {
            warn!("❌ MQTT: topic upload failed");
        }
        if !payload_ok {
            warn!("❌ MQTT: payload upload failed");
        }
        topic_ok && payload_ok
    }

    /// Publish the staged message at QoS 0 with a 120 s timeout.
    pub fn publish(&self) -> bool {
        let ok = self
            .modem
            .execute("AT+CMQTTPUB=0,0,120", "OK", self.timeouts.publish());
        let mut status = crate::lock(&self.status);
        if ok {
            status.publish_count += 1;
            info!("📤 MQTT: published (#{})", status.publish_count);
        } else {
            status.failed_publish_count += 1;
            warn!("❌ MQTT: publish failed");
        }
        ok
    }

    /// Best-effort disconnect, release and stop; each failure is logged and ignored.
    pub fn teardown(&self) {
        info!("MQTT: tearing down session");
        self.disconnect();
        self.release_client();
        self.end();
    }

    fn step(
        &self,
        command: &str,
        expected: &str,
        timeout: std::time::Duration,
        next: SessionState,
    ) -> bool {
        let ok = self.modem.execute(command, expected, timeout);
        if ok {
            info!("✅ MQTT: {} -> {:?}", command, next);
            self.set_state(next);
        } else {
            warn!("❌ MQTT: {} failed", command);
        }
        ok
    }

    fn set_state(&self, state: SessionState) {
        crate::lock(&self.status).state = state;
    }
}

/// Parse `+CMQTTCONNECT: <client>,<code>`.
pub fn parse_connect_code(line: &str) -> Option<(u8, u8)> {
    let rest = line.strip_prefix("+CMQTTCONNECT:")?.trim();
    let (client, code) = rest.split_once(',')?;
    Some((client.trim().parse().ok()?, code.trim().parse().ok()?))
}
