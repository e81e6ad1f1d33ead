//! # Signal supervisor.
//!
//! A dedicated worker demultiplexes process signals onto the event bus:
//!
//! - **SIGINT, SIGTERM** → broadcast QUIT (Sticky|HighPriority), then exit.
//! - **SIGHUP** → broadcast RELOAD.
//! - **SIGCHLD** → reap all zombie children in a non-blocking loop, logging
//!   exit code or terminating signal.
//! - **SIGPIPE** → ignored (registering the stream is the ignore).
//! - **SIGALRM, SIGUSR1, SIGUSR2** → logged at warning level.
//!
//! If stream registration fails the worker broadcasts QUIT so the process
//! stops instead of silently losing signal handling. A closed stream backs
//! off 100 ms and retries. The worker also watches its own inbox so a QUIT
//! broadcast by another service releases it.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, warn};
use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tokio::signal::unix::{signal, Signal, SignalKind};

use crate::events::{Event, EventClient, EventKind};
use crate::worker::Worker;

const STREAM_RETRY: Duration = Duration::from_millis(100);

pub struct SignalSupervisor;

struct Streams {
    int: Signal,
    term: Signal,
    hup: Signal,
    pipe: Signal,
    chld: Signal,
    alrm: Signal,
    usr1: Signal,
    usr2: Signal,
}

#[derive(Debug, Clone, Copy)]
enum Caught {
    Int,
    Term,
    Hup,
    Pipe,
    Chld,
    Alrm,
    Usr1,
    Usr2,
    /// A stream closed; caller backs off and retries.
    Closed,
}

impl Streams {
    fn new() -> std::io::Result<Self> {
        Ok(Self {
            int: signal(SignalKind::interrupt())?,
            term: signal(SignalKind::terminate())?,
            hup: signal(SignalKind::hangup())?,
            pipe: signal(SignalKind::pipe())?,
            chld: signal(SignalKind::child())?,
            alrm: signal(SignalKind::alarm())?,
            usr1: signal(SignalKind::user_defined1())?,
            usr2: signal(SignalKind::user_defined2())?,
        })
    }

    async fn wait(&mut self) -> Caught {
        tokio::select! {
            r = self.int.recv() => if r.is_some() { Caught::Int } else { Caught::Closed },
            r = self.term.recv() => if r.is_some() { Caught::Term } else { Caught::Closed },
            r = self.hup.recv() => if r.is_some() { Caught::Hup } else { Caught::Closed },
            r = self.pipe.recv() => if r.is_some() { Caught::Pipe } else { Caught::Closed },
            r = self.chld.recv() => if r.is_some() { Caught::Chld } else { Caught::Closed },
            r = self.alrm.recv() => if r.is_some() { Caught::Alrm } else { Caught::Closed },
            r = self.usr1.recv() => if r.is_some() { Caught::Usr1 } else { Caught::Closed },
            r = self.usr2.recv() => if r.is_some() { Caught::Usr2 } else { Caught::Closed },
        }
    }
}

#[async_trait]
impl Worker for SignalSupervisor {
    fn name(&self) -> &str {
        "signal-supervisor"
    }

    async fn run(self: Box<Self>, client: EventClient) {
        let mut streams = match Streams::new() {
            Ok(streams) => streams,
            Err(err) => {
                error!("signal stream registration failed: {err}");
                let _ = client.broadcast(Event::quit());
                return;
            }
        };
        debug!("Signal handler started.");

        loop {
            let caught = tokio::select! {
                caught = streams.wait() => caught,
                ev = client.pop_wait(None) => {
                    match ev {
                        Some(ev) if ev.kind() == EventKind::Quit => {
                            debug!("Signal handler terminated.");
                            return;
                        }
                        _ => continue,
                    }
                }
            };

            match caught {
                Caught::Int | Caught::Term => {
                    debug!("Signal received: {caught:?}");
                    let _ = client.broadcast(Event::quit());
                    return;
                }
                Caught::Hup => {
                    debug!("Signal received: {caught:?}");
                    let _ = client.broadcast(Event::reload());
                }
                Caught::Chld => reap_children(),
                Caught::Pipe => {}
                Caught::Alrm | Caught::Usr1 | Caught::Usr2 => {
                    warn!("Unhandled signal: {caught:?}");
                }
                Caught::Closed => {
                    warn!("signal stream closed; retrying");
                    tokio::time::sleep(STREAM_RETRY).await;
                }
            }
        }
    }
}

/// Reaps every available zombie child without blocking.
fn reap_children() {
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => break,
            Ok(WaitStatus::Exited(pid, code)) => {
                debug!("Process exited with code: {pid}: {code}");
            }
            Ok(WaitStatus::Signaled(pid, sig, _)) => {
                debug!("Process exited by signal: {pid}: {sig}");
            }
            Ok(status) => {
                warn!("Process exited abnormally: {status:?}");
            }
            Err(Errno::ECHILD) => break,
            Err(Errno::EINTR) => continue,
            Err(err) => {
                error!("waitpid: {err}");
                break;
            }
        }
    }
}
