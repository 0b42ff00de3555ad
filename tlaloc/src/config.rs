// Copyright (c) 2021 The tlaloc developers. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use serde::Deserialize;
use std::path::PathBuf;

use codec::QoS;

/// Server main config.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "General::default")]
    general: General,

    #[serde(default = "Listener::default_listeners")]
    listeners: Vec<Listener>,

    #[serde(default = "Security::default")]
    security: Security,

    #[serde(default = "Log::default")]
    log: Log,
}

impl Config {
    #[must_use]
    pub const fn general(&self) -> &General {
        &self.general
    }

    #[must_use]
    pub fn listeners(&self) -> &[Listener] {
        &self.listeners
    }

    #[must_use]
    pub const fn security(&self) -> &Security {
        &self.security
    }

    #[must_use]
    pub const fn log(&self) -> &Log {
        &self.log
    }
}

/// General section in config.
#[derive(Debug, Deserialize, Clone)]
pub struct General {
    /// Write process id to a file.
    ///
    /// Default is `/var/run/tlaloc.pid`.
    #[serde(default = "General::default_pid_file")]
    pub pid_file: PathBuf,

    /// Number of worker threads the runtime starts.
    ///
    /// Set to 0 to use the hardware parallelism of the machine.
    ///
    /// Default is 0.
    #[serde(default = "General::default_worker_threads")]
    pub worker_threads: usize,

    /// Clients may only connect with a keep alive interval less than or
    /// equal to this value, larger requests are silently capped.
    ///
    /// Set to 0 to honor whatever interval the client chose.
    ///
    /// Default is 0.
    #[serde(default = "General::default_max_keepalive")]
    pub max_keepalive: u64,

    /// Maximum number of unacknowledged QoS 1/2 messages per connection.
    ///
    /// Deliveries beyond this window are dropped.
    ///
    /// Default is 20.
    #[serde(default = "General::default_max_inflight_messages")]
    pub max_inflight_messages: usize,

    /// Maximum number of messages held for a disconnected session that
    /// connected with `clean_session` unset.
    ///
    /// Default is 1000.
    #[serde(default = "General::default_max_queued_messages")]
    pub max_queued_messages: usize,

    /// Maximum size of a single MQTT packet, in bytes, including the fixed
    /// header. Oversized packets close the connection.
    ///
    /// Set to 0 to only apply the protocol limit of 268435455 bytes.
    ///
    /// Default is 0.
    #[serde(default = "General::default_message_size_limit")]
    pub message_size_limit: usize,

    /// Maximum QoS a client may publish with. Publishing above this level
    /// closes the connection.
    ///
    /// Available values are 0, 1 and 2. Default is 2.
    #[serde(default = "General::default_max_qos")]
    pub max_qos: QoS,
}

impl General {
    pub fn default_pid_file() -> PathBuf {
        PathBuf::from("/var/run/tlaloc.pid")
    }

    pub const fn default_worker_threads() -> usize {
        0
    }

    pub const fn default_max_keepalive() -> u64 {
        0
    }

    pub const fn default_max_inflight_messages() -> usize {
        20
    }

    pub const fn default_max_queued_messages() -> usize {
        1000
    }

    pub const fn default_message_size_limit() -> usize {
        0
    }

    pub const fn default_max_qos() -> QoS {
        QoS::ExactOnce
    }
}

impl Default for General {
    fn default() -> Self {
        Self {
            pid_file: Self::default_pid_file(),
            worker_threads: Self::default_worker_threads(),
            max_keepalive: Self::default_max_keepalive(),
            max_inflight_messages: Self::default_max_inflight_messages(),
            max_queued_messages: Self::default_max_queued_messages(),
            message_size_limit: Self::default_message_size_limit(),
            max_qos: Self::default_max_qos(),
        }
    }
}

/// Listener represents a unique address/port combination together with the
/// transport spoken on it.
#[derive(Debug, Deserialize, Clone)]
pub struct Listener {
    /// Binding protocol.
    ///
    /// Default is mqtt.
    #[serde(default = "Listener::default_protocol")]
    pub protocol: Protocol,

    /// Binding address, including domain name and port.
    ///
    /// Common addresses are:
    /// - 0.0.0.0:1883, for mqtt
    /// - 0.0.0.0:8883, for mqtts
    ///
    /// Default is 0.0.0.0:1883.
    #[serde(default = "Listener::default_address")]
    pub address: String,

    /// Path to TLS cert file, required for mqtts.
    ///
    /// Default is None.
    #[serde(default = "Listener::default_cert_file")]
    pub cert_file: Option<PathBuf>,

    /// Path to TLS private key file, required for mqtts.
    ///
    /// Default is None.
    #[serde(default = "Listener::default_key_file")]
    pub key_file: Option<PathBuf>,

    /// Connection keep alive timeout in seconds.
    ///
    /// Used when the client sets no keep alive interval of its own in the
    /// CONNECT packet. Set to 0 to keep such connections open forever.
    ///
    /// Default is 60.
    #[serde(default = "Listener::default_keep_alive")]
    pub keep_alive: u64,
}

impl Listener {
    pub fn default_listeners() -> Vec<Self> {
        vec![Self::default()]
    }

    pub const fn default_protocol() -> Protocol {
        Protocol::Mqtt
    }

    pub fn default_address() -> String {
        "0.0.0.0:1883".to_string()
    }

    pub const fn default_cert_file() -> Option<PathBuf> {
        None
    }

    pub const fn default_key_file() -> Option<PathBuf> {
        None
    }

    pub const fn default_keep_alive() -> u64 {
        60
    }
}

impl Default for Listener {
    fn default() -> Self {
        Self {
            protocol: Self::default_protocol(),
            address: Self::default_address(),
            cert_file: Self::default_cert_file(),
            key_file: Self::default_key_file(),
            keep_alive: Self::default_keep_alive(),
        }
    }
}

/// Binding protocol types.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Raw Mqtt protocol, on TCP.
    #[serde(alias = "mqtt")]
    Mqtt,

    /// Raw Mqtt protocol, on TCP with TLS encryption.
    #[serde(alias = "mqtts")]
    Mqtts,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Security {
    /// Determines whether clients that connect without a username are
    /// allowed to connect. Connections failing the check are answered with
    /// CONNACK return code 5 and closed.
    ///
    /// Default is true.
    #[serde(default = "Security::default_allow_anonymous")]
    pub allow_anonymous: bool,
}

impl Security {
    pub const fn default_allow_anonymous() -> bool {
        true
    }
}

impl Default for Security {
    fn default() -> Self {
        Self {
            allow_anonymous: Self::default_allow_anonymous(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Log {
    /// Also print log to console.
    ///
    /// Default is true.
    #[serde(default = "Log::default_console_log")]
    pub console_log: bool,

    /// Set minimum log level.
    ///
    /// Available values are:
    /// - off, disable log
    /// - error
    /// - warn
    /// - info
    /// - debug
    /// - trace
    ///
    /// Default is "info".
    #[serde(default = "Log::default_level")]
    pub level: LogLevel,

    /// Path to log file.
    ///
    /// Default is "/var/log/tlaloc/tlaloc.log".
    #[serde(default = "Log::default_log_file")]
    pub log_file: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub enum LogLevel {
    #[serde(alias = "off")]
    Off,

    #[serde(alias = "error")]
    Error,

    #[serde(alias = "warn")]
    Warn,

    #[serde(alias = "info")]
    Info,

    #[serde(alias = "debug")]
    Debug,

    #[serde(alias = "trace")]
    Trace,
}

impl Log {
    pub const fn default_console_log() -> bool {
        true
    }

    pub const fn default_level() -> LogLevel {
        LogLevel::Info
    }

    pub fn default_log_file() -> PathBuf {
        PathBuf::from("/var/log/tlaloc/tlaloc.log")
    }
}

impl Default for Log {
    fn default() -> Self {
        Self {
            console_log: Self::default_console_log(),
            level: Self::default_level(),
            log_file: Self::default_log_file(),
        }
    }
}
