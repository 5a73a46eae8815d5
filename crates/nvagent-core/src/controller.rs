//! Run controller
//!
//! Drives whole passes and publishes their outcome:
//!
//! ```text
//! Init -> Erasing -> Programming -> Verifying -> Reporting -> Idle
//!  ^                                                  |
//!  +--------------------- (looping) ------------------+
//! ```
//!
//! With page-by-page read-back the middle states alternate per chunk. The
//! status word is set to the START sentinel at `Init` and written exactly
//! once more at `Reporting`, whatever happened in between. `Idle` is
//! terminal until [`RunController::reset`], which models an external reset.

use log::{debug, error, info};
use maybe_async::maybe_async;

use crate::chunk::{erase_chunk, erase_empty_pass, program_chunk, write_all, Chunks};
use crate::config::{AgentConfig, PassRequest, Readback, RequestEncoding, RunMode};
use crate::error::{Error, Result};
use crate::hal::NvMemory;
use crate::mmio::MemoryMappedIo;
use crate::status::{Status, StatusWord};
use crate::verify::{verify, verify_chunk, Verifier, VerifyReport};

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Decoding the request and publishing the sentinel
    Init,
    /// Erasing an erase unit
    Erasing,
    /// Programming a page
    Programming,
    /// Reading back and comparing
    Verifying,
    /// Publishing the final status word
    Reporting,
    /// Parked until external reset
    Idle,
}

/// Why the controller stopped running passes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Halt {
    /// Passes run since construction or the last reset
    pub passes: u32,
    /// Status word left for the host
    pub last: StatusWord,
}

/// What one pass did
#[derive(Debug, Clone)]
pub struct PassOutcome {
    /// Decoded request, if it was valid
    pub request: Option<PassRequest>,
    /// Status word published at the end of the pass
    pub word: StatusWord,
    /// Verify report, or the error that ended the pass
    pub result: core::result::Result<VerifyReport, Error>,
    status: Status,
}

impl PassOutcome {
    /// Decoded form of the published status
    pub fn status(&self) -> Status {
        self.status
    }
}

/// The agent: owns the device and the shared memory context
pub struct RunController<D, M> {
    device: D,
    io: M,
    base: AgentConfig,
    config: AgentConfig,
    state: State,
    passes: u32,
}

fn transition(state: &mut State, next: State) {
    if *state != next {
        debug!("Agent state {:?} -> {:?}", state, next);
        *state = next;
    }
}

impl<D: NvMemory, M: MemoryMappedIo> RunController<D, M> {
    /// Create an agent in the `Init` state
    pub fn new(device: D, io: M, config: AgentConfig) -> Self {
        Self {
            device,
            io,
            base: config,
            config,
            state: State::Init,
            passes: 0,
        }
    }

    /// Current state
    pub fn state(&self) -> State {
        self.state
    }

    /// Passes run since construction or the last reset
    pub fn passes(&self) -> u32 {
        self.passes
    }

    /// Configuration of the current or last pass
    ///
    /// This is the configuration given to [`RunController::new`] with the
    /// host's [`MemoryMappedIo::read_options`] applied.
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// The device
    pub fn device(&self) -> &D {
        &self.device
    }

    /// The device, mutably
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// The shared memory context
    pub fn io(&self) -> &M {
        &self.io
    }

    /// The shared memory context, mutably
    pub fn io_mut(&mut self) -> &mut M {
        &mut self.io
    }

    /// Take the agent apart
    pub fn into_parts(self) -> (D, M) {
        (self.device, self.io)
    }

    /// Leave `Idle` as an external reset would
    pub fn reset(&mut self) {
        self.state = State::Init;
        self.passes = 0;
    }

    /// Run passes until the configured run mode parks the agent
    ///
    /// Single-shot agents run one pass. Looping agents run another pass
    /// every time [`MemoryMappedIo::await_trigger`] returns `true`.
    #[maybe_async]
    pub async fn run(&mut self) -> Halt {
        if self.state == State::Idle {
            return Halt {
                passes: self.passes,
                last: self.io.read_status(),
            };
        }

        loop {
            let outcome = self.run_pass().await;
            if self.config.mode == RunMode::SingleShot || !self.io.await_trigger() {
                transition(&mut self.state, State::Idle);
                info!("Agent idle after {} pass(es)", self.passes);
                return Halt {
                    passes: self.passes,
                    last: outcome.word,
                };
            }
        }
    }

    /// Run a single pass and publish its status
    #[maybe_async]
    pub async fn run_pass(&mut self) -> PassOutcome {
        transition(&mut self.state, State::Init);
        let request = self.begin();

        let result = match request {
            Ok(request) => {
                info!(
                    "Pass {}: {} bytes at 0x{:08X}",
                    self.passes, request.len, request.target
                );
                self.execute(&request).await
            }
            Err(e) => Err(e),
        };

        transition(&mut self.state, State::Reporting);
        if let Err(e) = &result {
            error!("Pass {} failed: {}", self.passes, e);
        }
        let status = match &result {
            Ok(report) => self.config.verify_status(&report.result()),
            Err(_) => Status::BusError,
        };
        let word = StatusWord::encode(self.config.layout, &status);
        self.io.write_status(word);
        info!("Pass {} status {} ({})", self.passes, word, status);
        self.passes += 1;

        PassOutcome {
            request: request.ok(),
            word,
            result,
            status,
        }
    }

    /// Apply the host's options, decode the request and publish the START
    /// sentinel
    fn begin(&mut self) -> Result<PassRequest> {
        self.config = match self.io.read_options() {
            Some(options) => {
                debug!("Host options {:?}", options);
                self.base.with_options(options)
            }
            None => self.base,
        };

        let geometry = self.config.geometry;
        let request = self.config.validate().and_then(|()| {
            let raw = match self.config.request {
                RequestEncoding::StartPageCount => self.io.read_status().raw(),
                _ => self.io.read_request_register(),
            };
            PassRequest::decode(self.config.request, &geometry, raw)
        });

        let page_count = request
            .as_ref()
            .map_or(0, |r| r.page_count(&geometry) as u8);
        self.io.write_status(StatusWord::encode(
            self.config.layout,
            &Status::Start { page_count },
        ));
        request
    }

    #[maybe_async]
    async fn execute(&mut self, request: &PassRequest) -> Result<VerifyReport> {
        let config = self.config;
        let geometry = config.geometry;
        let timeouts = config.timeouts;
        let source = self.io.source();

        if config.readback == Readback::Mapped {
            transition(&mut self.state, State::Programming);
            let pages = write_all(&mut self.device, source, &geometry, request, &timeouts).await?;
            debug!("Programmed {} pages", pages);

            transition(&mut self.state, State::Verifying);
            return verify(
                &mut self.device,
                source,
                &geometry,
                request,
                config.policy,
                config.readback,
                &timeouts,
            )
            .await;
        }

        if request.len == 0 {
            transition(&mut self.state, State::Erasing);
            erase_empty_pass(&mut self.device, &geometry, request, &timeouts).await?;
        }

        let mut verifier = Verifier::new(config.policy, &geometry, request);
        for chunk in Chunks::new(&geometry, request) {
            if chunk.erase.is_some() {
                transition(&mut self.state, State::Erasing);
                erase_chunk(&mut self.device, &chunk, &timeouts).await?;
            }

            transition(&mut self.state, State::Programming);
            program_chunk(&mut self.device, source, &chunk, &timeouts).await?;

            transition(&mut self.state, State::Verifying);
            if !verify_chunk(&mut self.device, source, &chunk, &mut verifier, &timeouts).await? {
                break;
            }
        }

        Ok(verifier.finish())
    }
}
