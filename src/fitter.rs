//! Background AR model fitting thread.
//!
//! One sweep fits every channel that has a snapshot, then the thread waits
//! on its command channel until the refit interval elapses. Stop requests
//! are honoured between channels and during the wait.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::channel::ChannelShared;
use crate::config::MODEL_ORDER;
use crate::error::Result;
use crate::model::BurgEstimator;
use crate::sync::ChannelState;

pub enum FitterCommand {
    SetInterval(Duration),
    Stop,
}

/// Handle to a running fitter thread. Dropping it stops and joins the thread.
pub struct ModelFitter {
    commands: Sender<FitterCommand>,
    handle: Option<JoinHandle<()>>,
}

impl ModelFitter {
    pub fn spawn(
        channels: Arc<[ChannelShared]>,
        history_length: usize,
        interval: Duration,
    ) -> Result<Self> {
        let (commands, inbox) = crossbeam_channel::unbounded();
        let handle = thread::Builder::new()
            .name("ar-fitter".to_string())
            .spawn(move || {
                let mut fitter = FitterLoop::new(channels, history_length, interval, inbox);
                fitter.run();
            })?;

        Ok(Self {
            commands,
            handle: Some(handle),
        })
    }

    /// Takes effect at the end of the current wait, restarting it.
    pub fn set_interval(&self, interval: Duration) {
        let _ = self.commands.send(FitterCommand::SetInterval(interval));
    }

    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let _ = self.commands.send(FitterCommand::Stop);
        if handle.join().is_err() {
            log::error!("AR fitter thread panicked");
        }
    }
}

impl Drop for ModelFitter {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

enum Wake {
    Continue,
    Exit,
}

struct FitterLoop {
    channels: Arc<[ChannelShared]>,
    interval: Duration,
    inbox: Receiver<FitterCommand>,
    burg: BurgEstimator,
    samples: Vec<f64>,
    coefficients: Vec<f64>,
}

impl FitterLoop {
    fn new(
        channels: Arc<[ChannelShared]>,
        history_length: usize,
        interval: Duration,
        inbox: Receiver<FitterCommand>,
    ) -> Self {
        Self {
            channels,
            interval,
            inbox,
            burg: BurgEstimator::new(MODEL_ORDER, history_length),
            samples: vec![0.0; history_length],
            coefficients: vec![0.0; MODEL_ORDER],
        }
    }

    fn run(&mut self) {
        log::info!(
            "AR fitter started ({} channels, interval {:?})",
            self.channels.len(),
            self.interval
        );

        loop {
            if let Wake::Exit = self.sweep() {
                break;
            }
            if let Wake::Exit = self.wait() {
                break;
            }
        }

        log::info!("AR fitter exiting");
    }

    fn sweep(&mut self) -> Wake {
        let started = Instant::now();
        let mut fitted = 0usize;

        for chan in 0..self.channels.len() {
            match self.inbox.try_recv() {
                Ok(FitterCommand::Stop) | Err(TryRecvError::Disconnected) => return Wake::Exit,
                Ok(FitterCommand::SetInterval(interval)) => self.interval = interval,
                Err(TryRecvError::Empty) => {}
            }

            let shared = &self.channels[chan];
            if shared.state.load() == ChannelState::NotFull {
                continue;
            }

            shared.snapshot.copy_to(&mut self.samples);
            self.burg.fit(&self.samples, &mut self.coefficients);
            shared.coefficients.publish(&self.coefficients);
            shared.state.promote();
            fitted += 1;
        }

        if fitted > 0 {
            log::debug!("fitted {} channels in {:?}", fitted, started.elapsed());
        }
        Wake::Continue
    }

    fn wait(&mut self) -> Wake {
        let mut deadline = Instant::now() + self.interval;
        loop {
            match self.inbox.recv_deadline(deadline) {
                Ok(FitterCommand::SetInterval(interval)) => {
                    self.interval = interval;
                    deadline = Instant::now() + interval;
                }
                Ok(FitterCommand::Stop) | Err(RecvTimeoutError::Disconnected) => return Wake::Exit,
                Err(RecvTimeoutError::Timeout) => return Wake::Continue,
            }
        }
    }
}
