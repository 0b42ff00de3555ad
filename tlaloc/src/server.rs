// Copyright (c) 2021 The tlaloc developers. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! ServerContext is the main entry point of the broker.

use clap::Parser;
use std::fs::File;
use std::io::{Read, Write};
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, ErrorKind};
use crate::listener::Listener;
use crate::log::init_log;
use crate::session::SessionConfig;
use crate::types::ListenerId;

pub const DEFAULT_CONFIG: &str = "/etc/tlaloc/tlaloc.toml";
pub const CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Parser)]
#[command(name = "tlaloc", version, about = "High performance MQTT broker")]
struct CommandLine {
    /// Specify config file path.
    #[arg(short, long, value_name = "config_file", default_value = DEFAULT_CONFIG)]
    config: String,

    /// Test config file and exit.
    #[arg(short, long)]
    test: bool,

    /// Reload a running server by signalling the process in the pid file.
    #[arg(short, long)]
    reload: bool,
}

/// Entry point of server.
///
/// # Errors
///
/// Returns error if the config is invalid or the runtime fails to start.
pub fn run_server() -> Result<(), Error> {
    let cmdline = CommandLine::parse();

    let config_content = std::fs::read_to_string(&cmdline.config).map_err(|err| {
        Error::from_string(
            ErrorKind::ConfigError,
            format!("Failed to read config file {}, err: {err}", &cmdline.config),
        )
    })?;
    let config: Config = toml::from_str(&config_content)?;

    if cmdline.test {
        println!("The configuration file {} syntax is Ok", &cmdline.config);
        return Ok(());
    }

    init_log(config.log())?;

    let mut server = ServerContext::new(config);

    if cmdline.reload {
        return server.reload();
    }

    let worker_threads = server.config.general().worker_threads;
    let runtime = if worker_threads == 0 {
        Runtime::new()?
    } else {
        Builder::new_multi_thread()
            .worker_threads(worker_threads)
            .enable_all()
            .build()?
    };
    server.run_loop(&runtime)
}

/// ServerContext manages the lifetime of the dispatcher and the listeners.
#[derive(Debug)]
pub struct ServerContext {
    config: Config,
}

impl ServerContext {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Notify a running server process to reload its config by sending
    /// `SIGUSR1`.
    ///
    /// # Errors
    ///
    /// Returns error if the pid file is unreadable or the signal fails.
    #[cfg(unix)]
    pub fn reload(&mut self) -> Result<(), Error> {
        log::info!("reload()");
        let mut fd = File::open(&self.config.general().pid_file)?;
        let mut pid_str = String::new();
        fd.read_to_string(&mut pid_str)?;
        let pid = pid_str.trim().parse::<i32>().map_err(|err| {
            Error::from_string(
                ErrorKind::PidError,
                format!(
                    "Failed to parse pid {pid_str} from file {:?}, err: {err:?}",
                    &self.config.general().pid_file
                ),
            )
        })?;
        unsafe { nc::kill(pid, nc::SIGUSR1) }.map_err(|err| {
            Error::from_string(
                ErrorKind::PidError,
                format!("Failed to notify process {pid}, got {err:?}"),
            )
        })?;
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn reload(&mut self) -> Result<(), Error> {
        Err(Error::new(
            ErrorKind::ParameterError,
            "reload is only supported on unix",
        ))
    }

    fn write_pid(&self) -> Result<(), Error> {
        let pid = std::process::id();
        let mut fd = File::create(&self.config.general().pid_file)?;
        write!(fd, "{pid}")?;
        Ok(())
    }

    /// Init modules and run tokio runtime until it is interrupted.
    ///
    /// # Errors
    ///
    /// Returns error if a listener fails to bind.
    pub fn run_loop(&mut self, runtime: &Runtime) -> Result<(), Error> {
        self.write_pid()?;
        runtime.block_on(self.init_modules())
    }

    async fn init_modules(&mut self) -> Result<(), Error> {
        let (listeners_to_dispatcher_sender, listeners_to_dispatcher_receiver) =
            mpsc::channel(CHANNEL_CAPACITY);
        let mut dispatcher_to_listener_senders = Vec::new();
        let mut handles = Vec::new();

        for (index, listener_config) in self.config.listeners().iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let listener_id = index as ListenerId;
            let (dispatcher_to_listener_sender, dispatcher_to_listener_receiver) =
                mpsc::channel(CHANNEL_CAPACITY);
            dispatcher_to_listener_senders.push((listener_id, dispatcher_to_listener_sender));

            let session_config = SessionConfig::new(
                self.config.general(),
                self.config.security(),
                listener_config,
            );
            let mut listener = Listener::bind(
                listener_id,
                listener_config,
                session_config,
                listeners_to_dispatcher_sender.clone(),
                dispatcher_to_listener_receiver,
            )
            .await?;
            handles.push(tokio::spawn(async move {
                listener.run_loop().await;
            }));
        }

        let mut dispatcher = Dispatcher::new(
            self.config.general(),
            dispatcher_to_listener_senders,
            listeners_to_dispatcher_receiver,
        );
        handles.push(tokio::spawn(async move {
            dispatcher.run_loop().await;
        }));

        for handle in handles {
            let _ret = handle.await;
        }
        Ok(())
    }
}
