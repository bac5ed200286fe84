use crate::config::{CredentialNames, Timeouts};
use crate::modem::{CommandEngine, Completion, SharedModem};
use log::{error, info, warn};
use std::sync::Mutex;

/// The three TLS artifacts the modem needs for mutual authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    CaCert,
    ClientCert,
    ClientKey,
}

impl CredentialKind {
    pub const ALL: [CredentialKind; 3] = [
        CredentialKind::CaCert,
        CredentialKind::ClientCert,
        CredentialKind::ClientKey,
    ];

    pub fn file_name(self, names: &CredentialNames) -> &str {
        match self {
            CredentialKind::CaCert => names.ca_cert.as_str(),
            CredentialKind::ClientCert => names.client_cert.as_str(),
            CredentialKind::ClientKey => names.client_key.as_str(),
        }
    }
}

/// Source of credential bytes for provisioning a factory-fresh modem.
pub trait CredentialStore: Send + Sync {
    /// `Ok(None)` when the store simply does not hold that artifact.
    fn fetch(&self, kind: CredentialKind) -> anyhow::Result<Option<Vec<u8>>>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CredentialPresence {
    pub ca_cert: bool,
    pub client_cert: bool,
    pub client_key: bool,
}

impl CredentialPresence {
    pub fn all_present(&self) -> bool {
        self.ca_cert && self.client_cert && self.client_key
    }

    pub fn has(&self, kind: CredentialKind) -> bool {
        match kind {
            CredentialKind::CaCert => self.ca_cert,
            CredentialKind::ClientCert => self.client_cert,
            CredentialKind::ClientKey => self.client_key,
        }
    }
}

/// TLS context 0 on the modem: credential inventory, provisioning and configuration.
pub struct SecureContext {
    modem: SharedModem,
    timeouts: Timeouts,
    presence: Mutex<CredentialPresence>,
}

impl SecureContext {
    pub fn new(modem: SharedModem, timeouts: Timeouts) -> Self {
        Self {
            modem,
            timeouts,
            presence: Mutex::new(CredentialPresence::default()),
        }
    }

    /// Flags from the most recent `check_presence`.
    pub fn presence(&self) -> CredentialPresence {
        *crate::lock(&self.presence)
    }

    /// List stored credentials and record which of the named three exist.
    pub fn check_presence(&self, names: &CredentialNames) -> bool {
        let listing = self
            .modem
            .lock()
            .exchange(
                "AT+CCERTLIST",
                "",
                self.timeouts.standard(),
                Completion::Elapsed,
            )
            .text();

        let presence = CredentialPresence {
            ca_cert: listing.contains(names.ca_cert.as_str()),
            client_cert: listing.contains(names.client_cert.as_str()),
            client_key: listing.contains(names.client_key.as_str()),
        };
        *crate::lock(&self.presence) = presence;

        for kind in CredentialKind::ALL {
            if presence.has(kind) {
                info!("SSL: ✅ {} present", kind.file_name(names));
            } else {
                warn!("SSL: ❌ {} missing", kind.file_name(names));
            }
        }
        presence.all_present()
    }

    /// Issue all five TLS settings, even after a failure, and report whether every one
    /// was accepted.
    pub fn configure(&self, names: &CredentialNames) -> bool {
        let commands = [
            "AT+CSSLCFG=\"sslversion\",0,4".to_string(),
            "AT+CSSLCFG=\"authmode\",0,2".to_string(),
            format!("AT+CSSLCFG=\"cacert\",0,\"{}\"", names.ca_cert),
            format!("AT+CSSLCFG=\"clientcert\",0,\"{}\"", names.client_cert),
            format!("AT+CSSLCFG=\"clientkey\",0,\"{}\"", names.client_key),
        ];

        let mut all_ok = true;
        for command in &commands {
            let ok = self
                .modem
                .execute(command, "OK", self.timeouts.standard());
            if !ok {
                warn!("SSL: ❌ {} rejected", command);
            }
            all_ok &= ok;
        }

        if all_ok {
            info!("SSL: ✅ context configured");
        }
        all_ok
    }

    /// Upload whichever credentials are absent, then re-check the inventory.
    ///
    /// Credentials already on the modem are never rewritten, so calling this again once
    /// everything is present sends only the listing command.
    pub fn provision_missing(&self, names: &CredentialNames, store: &dyn CredentialStore) -> bool {
        if self.check_presence(names) {
            return true;
        }

        let presence = self.presence();
        for kind in CredentialKind::ALL {
            if presence.has(kind) {
                continue;
            }
            let name = kind.file_name(names);
            match store.fetch(kind) {
                Ok(Some(bytes)) => {
                    if self.upload(name, &bytes) {
                        info!("SSL: ✅ provisioned {} ({} bytes)", name, bytes.len());
                    } else {
                        error!("SSL: ❌ upload of {} failed", name);
                    }
                }
                Ok(None) => error!("SSL: ❌ {} missing and not in credential store", name),
                Err(e) => error!("SSL: ❌ reading {} from credential store: {:?}", name, e),
            }
        }

        self.check_presence(names)
    }

    pub fn delete_credential(&self, name: &str) -> bool {
        let ok = self.modem.execute(
            &format!("AT+CCERTDELE=\"{}\"", name),
            "OK",
            self.timeouts.standard(),
        );
        if ok {
            info!("SSL: deleted {}", name);
        } else {
            warn!("SSL: ❌ could not delete {}", name);
        }
        ok
    }

    fn upload(&self, name: &str, bytes: &[u8]) -> bool {
        let mut engine = self.modem.lock();
        let command = format!("AT+CCERTDOWN=\"{}\",{}", name, bytes.len());
        staged_upload(&mut engine, &command, bytes, &self.timeouts)
    }
}

/// `command` → `>` prompt → raw bytes → `OK`. Without the prompt nothing is streamed.
pub(crate) fn staged_upload(
    engine: &mut CommandEngine,
    command: &str,
    bytes: &[u8],
    timeouts: &Timeouts,
) -> bool {
    let prompt = engine.exchange(command, ">", timeouts.prompt(), Completion::Prompt);
    if !prompt.matched {
        warn!("Modem: no data prompt for {}", command);
        return false;
    }
    engine
        .stream(bytes, "OK", timeouts.standard(), Completion::FinalResult)
        .matched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::{fast_timeouts, scripted_modem, ScriptedModem};

    const LISTING_ALL: &str = "\r\n+CCERTLIST: \"Amazon-Root-Certificate-Filename\"\r\n+CCERTLIST: \"Thing-Certificate-Filename\"\r\n+CCERTLIST: \"Private-Key-Filename\"\r\n\r\nOK\r\n";
    const LISTING_CA_ONLY: &str =
        "\r\n+CCERTLIST: \"Amazon-Root-Certificate-Filename\"\r\n\r\nOK\r\n";

    fn context() -> (SecureContext, ScriptedModem) {
        let (modem, script) = scripted_modem();
        (SecureContext::new(modem, fast_timeouts()), script)
    }

    struct FixedStore;

    impl CredentialStore for FixedStore {
        fn fetch(&self, kind: CredentialKind) -> anyhow::Result<Option<Vec<u8>>> {
            Ok(match kind {
                CredentialKind::CaCert => Some(b"CA".to_vec()),
                CredentialKind::ClientCert => Some(b"CERT".to_vec()),
                CredentialKind::ClientKey => None,
            })
        }
    }

    #[test]
    fn test_check_presence_flags() {
        let (ssl, script) = context();
        let names = CredentialNames::default();

        script.on("AT+CCERTLIST", LISTING_CA_ONLY);
        assert!(!ssl.check_presence(&names));
        assert_eq!(
            ssl.presence(),
            CredentialPresence {
                ca_cert: true,
                client_cert: false,
                client_key: false
            }
        );

        script.on("AT+CCERTLIST", LISTING_ALL);
        assert!(ssl.check_presence(&names));
        assert!(ssl.presence().all_present());
    }

    #[test]
    fn test_configure_issues_all_five_when_one_fails() {
        let (ssl, script) = context();
        let names = CredentialNames::default();
        script
            .on("AT+CSSLCFG=\"sslversion\",0,4", "\r\nOK\r\n")
            .on("AT+CSSLCFG=\"authmode\",0,2", "\r\nERROR\r\n")
            .on(
                "AT+CSSLCFG=\"cacert\",0,\"Amazon-Root-Certificate-Filename\"",
                "\r\nOK\r\n",
            )
            .on(
                "AT+CSSLCFG=\"clientcert\",0,\"Thing-Certificate-Filename\"",
                "\r\nOK\r\n",
            )
            .on(
                "AT+CSSLCFG=\"clientkey\",0,\"Private-Key-Filename\"",
                "\r\nOK\r\n",
            );

        assert!(!ssl.configure(&names));
        assert_eq!(script.sent_count("AT+CSSLCFG="), 5);
    }

    #[test]
    fn test_configure_succeeds_when_all_accepted() {
        let (ssl, script) = context();
        let names = CredentialNames::default();
        for command in [
            "AT+CSSLCFG=\"sslversion\",0,4",
            "AT+CSSLCFG=\"authmode\",0,2",
            "AT+CSSLCFG=\"cacert\",0,\"Amazon-Root-Certificate-Filename\"",
            "AT+CSSLCFG=\"clientcert\",0,\"Thing-Certificate-Filename\"",
            "AT+CSSLCFG=\"clientkey\",0,\"Private-Key-Filename\"",
        ] {
            script.on(command, "\r\nOK\r\n");
        }

        assert!(ssl.configure(&names));
        assert_eq!(script.sent().len(), 5);
    }

    #[test]
    fn test_provision_uploads_only_missing() {
        let (ssl, script) = context();
        let names = CredentialNames::default();
        script
            .on("AT+CCERTLIST", LISTING_CA_ONLY)
            .on("AT+CCERTDOWN=\"Thing-Certificate-Filename\",4", "\r\n>")
            .on_raw("CERT", "\r\nOK\r\n")
            .on("AT+CCERTLIST", LISTING_CA_ONLY);

        // The key is absent from both the modem and the store.
        assert!(!ssl.provision_missing(&names, &FixedStore));
        assert_eq!(script.sent_count("AT+CCERTDOWN=\"Amazon"), 0);
        assert_eq!(
            script.sent(),
            vec![
                "AT+CCERTLIST",
                "AT+CCERTDOWN=\"Thing-Certificate-Filename\",4",
                "CERT",
                "AT+CCERTLIST",
            ]
        );
    }

    #[test]
    fn test_provision_is_idempotent_when_present() {
        let (ssl, script) = context();
        script.on("AT+CCERTLIST", LISTING_ALL);
        assert!(ssl.provision_missing(&CredentialNames::default(), &FixedStore));
        assert_eq!(script.sent(), vec!["AT+CCERTLIST"]);
    }

    #[test]
    fn test_upload_without_prompt_streams_nothing() {
        let (ssl, script) = context();
        script.on("AT+CCERTDOWN=\"x\",2", "\r\nERROR\r\n");
        assert!(!ssl.upload("x", b"CA"));
        assert_eq!(script.sent(), vec!["AT+CCERTDOWN=\"x\",2"]);
    }

    #[test]
    fn test_delete_credential() {
        let (ssl, script) = context();
        script.on("AT+CCERTDELE=\"old.pem\"", "\r\nOK\r\n");
        assert!(ssl.delete_credential("old.pem"));
        assert!(!ssl.delete_credential("old.pem"));
    }
}
