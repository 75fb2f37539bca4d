//! OS signal handling.
//!
//! # Responsibilities
//! - Subscribe to each configured shutdown signal once
//! - Translate every delivery into [`Lifecycle::shutdown`]
//!
//! # Design Decisions
//! - Signal delivery is injected through [`SignalSource`], so the wiring is
//!   testable without raising real signals
//! - Repeated deliveries call `shutdown` again, which is a no-op

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use futures_util::stream::{self, BoxStream, StreamExt};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::lifecycle::state::Lifecycle;

/// Stream yielding one item per signal delivery.
pub type SignalStream = BoxStream<'static, ()>;

/// Signals that can trigger shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutdownSignal {
    Hangup,
    Interrupt,
    Terminate,
    Quit,
    User1,
    User2,
}

impl ShutdownSignal {
    /// Default set: SIGTERM, SIGHUP, SIGINT.
    pub const DEFAULTS: [ShutdownSignal; 3] = [
        ShutdownSignal::Terminate,
        ShutdownSignal::Hangup,
        ShutdownSignal::Interrupt,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ShutdownSignal::Hangup => "SIGHUP",
            ShutdownSignal::Interrupt => "SIGINT",
            ShutdownSignal::Terminate => "SIGTERM",
            ShutdownSignal::Quit => "SIGQUIT",
            ShutdownSignal::User1 => "SIGUSR1",
            ShutdownSignal::User2 => "SIGUSR2",
        }
    }
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ShutdownSignal {
    type Err = SignalError;

    /// Accepts `SIGTERM`, `TERM` or `term`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let bare = upper.strip_prefix("SIG").unwrap_or(&upper);
        match bare {
            "HUP" => Ok(ShutdownSignal::Hangup),
            "INT" => Ok(ShutdownSignal::Interrupt),
            "TERM" => Ok(ShutdownSignal::Terminate),
            "QUIT" => Ok(ShutdownSignal::Quit),
            "USR1" => Ok(ShutdownSignal::User1),
            "USR2" => Ok(ShutdownSignal::User2),
            _ => Err(SignalError::Unknown(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("unknown signal name '{0}'")]
    Unknown(String),

    #[error("signal {0} is not supported on this platform")]
    Unsupported(ShutdownSignal),

    #[error("failed to install {signal} handler: {source}")]
    Install {
        signal: ShutdownSignal,
        #[source]
        source: std::io::Error,
    },
}

/// Source of signal deliveries.
pub trait SignalSource {
    fn subscribe(&self, signal: ShutdownSignal) -> Result<SignalStream, SignalError>;
}

/// Real process signals via tokio.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsSignals;

#[cfg(unix)]
impl SignalSource for OsSignals {
    fn subscribe(&self, signal: ShutdownSignal) -> Result<SignalStream, SignalError> {
        use tokio::signal::unix::{signal as unix_signal, SignalKind};

        let kind = match signal {
            ShutdownSignal::Hangup => SignalKind::hangup(),
            ShutdownSignal::Interrupt => SignalKind::interrupt(),
            ShutdownSignal::Terminate => SignalKind::terminate(),
            ShutdownSignal::Quit => SignalKind::quit(),
            ShutdownSignal::User1 => SignalKind::user_defined1(),
            ShutdownSignal::User2 => SignalKind::user_defined2(),
        };
        let listener =
            unix_signal(kind).map_err(|source| SignalError::Install { signal, source })?;
        Ok(stream::unfold(listener, |mut listener| async move {
            listener.recv().await.map(|()| ((), listener))
        })
        .boxed())
    }
}

#[cfg(not(unix))]
impl SignalSource for OsSignals {
    fn subscribe(&self, signal: ShutdownSignal) -> Result<SignalStream, SignalError> {
        match signal {
            ShutdownSignal::Interrupt => Ok(stream::unfold((), |()| async {
                tokio::signal::ctrl_c().await.ok().map(|()| ((), ()))
            })
            .boxed()),
            other => Err(SignalError::Unsupported(other)),
        }
    }
}

/// In-process signal source; `send` simulates a delivery.
#[derive(Debug, Clone)]
pub struct ChannelSignals {
    tx: broadcast::Sender<ShutdownSignal>,
}

impl ChannelSignals {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    /// Deliver `signal` to every current subscriber.
    pub fn send(&self, signal: ShutdownSignal) {
        let _ = self.tx.send(signal);
    }
}

impl Default for ChannelSignals {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalSource for ChannelSignals {
    fn subscribe(&self, signal: ShutdownSignal) -> Result<SignalStream, SignalError> {
        let rx = self.tx.subscribe();
        Ok(stream::unfold(rx, move |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(delivered) if delivered == signal => return Some(((), rx)),
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed())
    }
}

impl Lifecycle {
    /// Call [`shutdown`](Lifecycle::shutdown) whenever one of `signals` is
    /// delivered by `source`.
    ///
    /// Subscribes to every signal before returning, so a failure to install
    /// any handler is reported up front. Duplicate names are subscribed once.
    pub fn shutdown_on_signals<S>(
        &self,
        source: &S,
        signals: &[ShutdownSignal],
    ) -> Result<Vec<JoinHandle<()>>, SignalError>
    where
        S: SignalSource + ?Sized,
    {
        let mut seen = HashSet::new();
        let mut streams = Vec::new();
        for &signal in signals {
            if seen.insert(signal) {
                streams.push((signal, source.subscribe(signal)?));
            }
        }

        tracing::info!(
            signals = ?streams.iter().map(|(s, _)| s.name()).collect::<Vec<_>>(),
            "Shutdown signal handlers installed"
        );

        Ok(streams
            .into_iter()
            .map(|(signal, mut deliveries)| {
                let lifecycle = self.clone();
                tokio::spawn(async move {
                    while deliveries.next().await.is_some() {
                        tracing::info!(signal = %signal, "Shutdown signal received");
                        let lifecycle = lifecycle.clone();
                        tokio::spawn(async move { lifecycle.shutdown().await });
                    }
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn parse_signal_names() {
        assert_eq!("SIGTERM".parse::<ShutdownSignal>().unwrap(), ShutdownSignal::Terminate);
        assert_eq!("hup".parse::<ShutdownSignal>().unwrap(), ShutdownSignal::Hangup);
        assert_eq!(" SIGINT ".parse::<ShutdownSignal>().unwrap(), ShutdownSignal::Interrupt);
        assert!(matches!(
            "SIGKILL".parse::<ShutdownSignal>(),
            Err(SignalError::Unknown(name)) if name == "SIGKILL"
        ));
    }

    #[test]
    fn signal_names_round_trip_through_display() {
        for signal in ShutdownSignal::DEFAULTS {
            assert_eq!(signal.to_string().parse::<ShutdownSignal>().unwrap(), signal);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn configured_signal_triggers_shutdown() {
        let lifecycle = Lifecycle::builder()
            .shutdown_delay(None)
            .termination_grace_period(None)
            .terminator(|| {})
            .build();
        let signals = ChannelSignals::new();
        lifecycle
            .shutdown_on_signals(&signals, &[ShutdownSignal::Terminate])
            .unwrap();

        signals.send(ShutdownSignal::User1);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!lifecycle.is_terminating());

        signals.send(ShutdownSignal::Terminate);
        tokio::time::timeout(Duration::from_secs(1), lifecycle.terminated())
            .await
            .expect("shutdown should run after SIGTERM");
        assert!(lifecycle.is_terminating());
    }
}
