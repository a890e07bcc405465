//! Engine configuration.
//!
//! Configuration travels as a mapping from a closed set of keys to typed
//! values. `open()` validates the map once (a key carrying a value of the
//! wrong type is rejected) and the engine then reads it through typed
//! getters with per-key defaults when building the transport config.

use std::collections::HashMap;

use crate::error::{EngineError, Result};

/// Application protocols offered during the handshake, in preference
/// order. This is the fixed hq-interop set; the server offers the same
/// list.
pub const APPLICATION_PROTOS: &[&[u8]] =
    &[b"hq-interop", b"hq-29", b"hq-28", b"hq-27", b"http/0.9"];

/// Closed set of engine configuration keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    /// u64: idle timeout in milliseconds (default 5 000).
    MaxIdleTimeout,
    /// u64: max UDP payload for both directions (default 1 350).
    MaxUdpPayloadSize,
    /// u64: connection-level flow-control budget (default 10 000 000).
    InitialMaxData,
    /// u64: per-stream credit, locally-initiated bidi (default 1 000 000).
    InitialMaxStreamDataBidiLocal,
    /// u64: per-stream credit, peer-initiated bidi (default 1 000 000).
    InitialMaxStreamDataBidiRemote,
    /// u64: per-stream credit, unidirectional (default 1 000 000).
    InitialMaxStreamDataUni,
    /// u64: bidirectional stream count cap (default 100).
    InitialMaxStreamsBidi,
    /// u64: unidirectional stream count cap (default 100).
    InitialMaxStreamsUni,
    /// bool: disable active migration (default true).
    DisableActiveMigration,
    /// bool: verbose transport logging (default false).
    EnableDebugLog,
    /// bool: verify the peer certificate; false accepts self-signed
    /// certificates (default true).
    VerifyPeer,
}

/// A typed configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    U64(u64),
    Bool(bool),
    Str(String),
}

/// Raw key/value configuration as supplied by the application.
pub type ConfigMap = HashMap<ConfigKey, ConfigValue>;

/// Validated engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    map: ConfigMap,
}

impl EngineConfig {
    /// Validate and adopt a configuration map.
    ///
    /// Every key has exactly one accepted value type; a mismatch fails the
    /// whole map.
    pub fn from_map(map: ConfigMap) -> Result<EngineConfig> {
        for (key, value) in &map {
            let ok = match key {
                ConfigKey::DisableActiveMigration
                | ConfigKey::EnableDebugLog
                | ConfigKey::VerifyPeer => matches!(value, ConfigValue::Bool(_)),
                _ => matches!(value, ConfigValue::U64(_)),
            };
            if !ok {
                return Err(EngineError::Config(format!(
                    "key {key:?} does not accept {value:?}"
                )));
            }
        }
        Ok(EngineConfig { map })
    }

    pub fn get_u64(&self, key: ConfigKey, default: u64) -> u64 {
        match self.map.get(&key) {
            Some(ConfigValue::U64(v)) => *v,
            _ => default,
        }
    }

    pub fn get_bool(&self, key: ConfigKey, default: bool) -> bool {
        match self.map.get(&key) {
            Some(ConfigValue::Bool(v)) => *v,
            _ => default,
        }
    }

    /// Whether transport debug logging was requested.
    pub fn debug_log(&self) -> bool {
        self.get_bool(ConfigKey::EnableDebugLog, false)
    }

    /// Build the quiche transport configuration for a client connection.
    pub fn build_transport(&self) -> Result<quiche::Config> {
        let mut cfg = quiche::Config::new(quiche::PROTOCOL_VERSION)?;

        cfg.set_application_protos(APPLICATION_PROTOS)?;

        cfg.set_max_idle_timeout(self.get_u64(ConfigKey::MaxIdleTimeout, 5_000));

        let payload = self.get_u64(ConfigKey::MaxUdpPayloadSize, 1_350) as usize;
        cfg.set_max_recv_udp_payload_size(payload);
        cfg.set_max_send_udp_payload_size(payload);

        cfg.set_initial_max_data(self.get_u64(ConfigKey::InitialMaxData, 10_000_000));
        cfg.set_initial_max_stream_data_bidi_local(
            self.get_u64(ConfigKey::InitialMaxStreamDataBidiLocal, 1_000_000),
        );
        cfg.set_initial_max_stream_data_bidi_remote(
            self.get_u64(ConfigKey::InitialMaxStreamDataBidiRemote, 1_000_000),
        );
        cfg.set_initial_max_stream_data_uni(
            self.get_u64(ConfigKey::InitialMaxStreamDataUni, 1_000_000),
        );
        cfg.set_initial_max_streams_bidi(self.get_u64(ConfigKey::InitialMaxStreamsBidi, 100));
        cfg.set_initial_max_streams_uni(self.get_u64(ConfigKey::InitialMaxStreamsUni, 100));

        cfg.set_disable_active_migration(self.get_bool(ConfigKey::DisableActiveMigration, true));
        cfg.verify_peer(self.get_bool(ConfigKey::VerifyPeer, true));
        cfg.set_cc_algorithm(quiche::CongestionControlAlgorithm::Reno);

        if std::env::var_os("SSLKEYLOGFILE").is_some() {
            cfg.log_keys();
        }

        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_map_uses_defaults() {
        let cfg = EngineConfig::from_map(ConfigMap::new()).unwrap();
        assert_eq!(cfg.get_u64(ConfigKey::MaxIdleTimeout, 5_000), 5_000);
        assert_eq!(cfg.get_u64(ConfigKey::InitialMaxData, 10_000_000), 10_000_000);
        assert!(cfg.get_bool(ConfigKey::DisableActiveMigration, true));
        assert!(cfg.get_bool(ConfigKey::VerifyPeer, true));
        assert!(!cfg.debug_log());
    }

    #[test]
    fn supplied_values_override_defaults() {
        let mut map = ConfigMap::new();
        map.insert(ConfigKey::MaxIdleTimeout, ConfigValue::U64(300_000));
        map.insert(ConfigKey::VerifyPeer, ConfigValue::Bool(false));

        let cfg = EngineConfig::from_map(map).unwrap();
        assert_eq!(cfg.get_u64(ConfigKey::MaxIdleTimeout, 5_000), 300_000);
        assert!(!cfg.get_bool(ConfigKey::VerifyPeer, true));
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let mut map = ConfigMap::new();
        map.insert(ConfigKey::MaxIdleTimeout, ConfigValue::Bool(true));
        assert!(EngineConfig::from_map(map).is_err());

        let mut map = ConfigMap::new();
        map.insert(ConfigKey::VerifyPeer, ConfigValue::U64(1));
        assert!(EngineConfig::from_map(map).is_err());

        let mut map = ConfigMap::new();
        map.insert(ConfigKey::InitialMaxData, ConfigValue::Str("lots".into()));
        assert!(EngineConfig::from_map(map).is_err());
    }

    #[test]
    fn transport_config_builds_with_defaults() {
        let cfg = EngineConfig::from_map(ConfigMap::new()).unwrap();
        assert!(cfg.build_transport().is_ok());
    }
}
