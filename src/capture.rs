//! Capture orchestration.
//!
//! On each debugger pause the orchestrator hashes the paused stack, unrolls
//! a bounded number of innermost call frames through the debug session and
//! stores the batch keyed by hash. Later, during event post-processing, it
//! hashes the reported exception's frames, takes the matching batch from
//! the cache and splices variables into the aligned reported frames.
//!
//! Nothing in here may propagate a failure into the monitored application:
//! every internal error degrades to "no variables" and the paused process
//! is always resumed.

use crate::cache::FrameCache;
use crate::chain::CallbackChain;
use crate::frame::{
    function_names_match, CapturedFrameVariables, Event, Exception, StackFrame, StackParser,
    PROMISE_FRAME,
};
use crate::hash::{hash_frames, hash_from_stack};
use crate::inspector::{
    CallFrame, DebugSession, OnPause, PausedEvent, Resume, PAUSE_REASON_EXCEPTION,
    PAUSE_REASON_PROMISE_REJECTION,
};
use crate::ratelimit::{RateLimiter, RATE_LIMIT_TICK};
use crate::{lv_info, weak_error};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Frame unrolling budget for a single pause. Queuing unrolling callbacks
/// for a deep stack synchronously can overflow the native stack of the
/// monitoring code itself, so deeper frames keep only a function name.
const MAX_CAPTURED_FRAMES: usize = 5;

fn default_capture_all_exceptions() -> bool {
    true
}

fn default_max_exceptions_per_second() -> u32 {
    50
}

/// Capture configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureOptions {
    /// Capture caught and uncaught exceptions, vs. uncaught only.
    #[serde(default = "default_capture_all_exceptions")]
    pub capture_all_exceptions: bool,
    /// Caught-exception budget per second before the rate limiter backs
    /// off. Uncaught-exception capture is never throttled.
    #[serde(default = "default_max_exceptions_per_second")]
    pub max_exceptions_per_second: u32,
    /// Attach variables to out-of-app frames too.
    #[serde(default)]
    pub include_out_of_app_frames: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            capture_all_exceptions: true,
            max_exceptions_per_second: 50,
            include_out_of_app_frames: false,
        }
    }
}

struct Shared<S> {
    options: CaptureOptions,
    session: Arc<S>,
    parser: Arc<dyn StackParser>,
    cached_frames: FrameCache,
    limiter: Mutex<Option<RateLimiter>>,
}

impl<S: DebugSession + 'static> Shared<S> {
    /// Handle one pause notification. Every path out of here resumes the
    /// paused process, directly or through the chain's completion.
    fn handle_paused(self: &Arc<Self>, event: PausedEvent, resume: Resume) {
        if event.reason != PAUSE_REASON_EXCEPTION && event.reason != PAUSE_REASON_PROMISE_REJECTION
        {
            resume();
            return;
        }

        if let Ok(limiter) = self.limiter.lock() {
            if let Some(limiter) = limiter.as_ref() {
                limiter.increment();
            }
        }

        // the pause data description carries the original stack string of
        // the thrown value
        let stack = event.data.as_ref().and_then(|data| data.description.as_deref());
        let Some(hash) = hash_from_stack(self.parser.as_ref(), stack) else {
            resume();
            return;
        };

        let chain = CallbackChain::new({
            let shared = Arc::clone(self);
            move |frames| {
                shared.cached_frames.put(hash, frames);
                resume();
            }
        });

        let mut call_frames = event.call_frames;
        call_frames.truncate(MAX_CAPTURED_FRAMES);

        // the chain pops last-in-first-served: feed frames in reverse so
        // frame 0 (the throw site) unrolls first
        for call_frame in call_frames.into_iter().rev() {
            let function = qualified_function_name(&call_frame);

            match call_frame.local_scope_id().map(str::to_string) {
                None => {
                    chain.add(move |chain, mut frames: Vec<CapturedFrameVariables>| {
                        frames.push(CapturedFrameVariables {
                            function,
                            vars: None,
                        });
                        chain.next(frames);
                        Ok(())
                    });
                }
                Some(object_id) => {
                    let session = Arc::clone(&self.session);
                    chain.add(move |chain, mut frames: Vec<CapturedFrameVariables>| {
                        let chain = chain.clone();
                        session.get_local_variables(
                            &object_id,
                            Box::new(move |vars| {
                                frames.push(CapturedFrameVariables {
                                    function,
                                    vars: Some(vars),
                                });
                                chain.next(frames);
                            }),
                        );
                        Ok(())
                    });
                }
            }
        }

        chain.next(vec![]);
    }

    fn add_local_variables_to_exception(&self, exception: &mut Exception) {
        let Some(stacktrace) = exception.stacktrace.as_mut() else {
            return;
        };
        let Some(hash) = hash_frames(Some(&stacktrace.frames)) else {
            return;
        };
        // a miss is not an error, capture is best-effort
        let Some(cached) = self.cached_frames.take(&hash) else {
            return;
        };

        // promise-constructor scaffolding has no debugger counterpart and
        // is dropped before alignment
        let mut reported: Vec<&mut StackFrame> = stacktrace
            .frames
            .iter_mut()
            .filter(|frame| frame.function.as_deref() != Some(PROMISE_FRAME))
            .collect();

        // captured batches are innermost-first, reported frames are
        // outermost-first: align in lock-step from opposite ends, stop at
        // the shorter list
        for (captured, frame) in cached.iter().zip(reported.iter_mut().rev()) {
            let Some(vars) = captured.vars.as_ref() else {
                continue;
            };
            if !frame.in_app && !self.options.include_out_of_app_frames {
                continue;
            }
            if !function_names_match(frame.function.as_deref(), &captured.function) {
                continue;
            }

            frame.vars = Some(vars.clone());
        }
    }
}

/// The class name is absent for module-level frames; the debugger reports
/// `global` for top-level code.
fn qualified_function_name(frame: &CallFrame) -> String {
    match frame.this.class_name.as_deref() {
        None | Some("global") => frame.function_name.clone(),
        Some(class) => format!("{class}.{}", frame.function_name),
    }
}

/// Adds local variables to exception stack frames.
///
/// One instance owns the single live debug session of the process.
/// [`LocalVariables::setup`] is idempotent and degrades to a no-op when the
/// debugging endpoint cannot be acquired; [`LocalVariables::process_event`]
/// is invoked by the generic event pipeline once per outgoing error event.
pub struct LocalVariables<S> {
    shared: Arc<Shared<S>>,
    setup_done: AtomicBool,
    active: AtomicBool,
}

impl<S: DebugSession + 'static> LocalVariables<S> {
    pub fn new(
        options: CaptureOptions,
        session: S,
        parser: impl StackParser + 'static,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                options,
                session: Arc::new(session),
                parser: Arc::new(parser),
                cached_frames: FrameCache::default(),
                limiter: Mutex::new(None),
            }),
            setup_done: AtomicBool::new(false),
            active: AtomicBool::new(false),
        }
    }

    /// Connect the debug session and arm exception capture.
    ///
    /// Idempotent. When no debugging endpoint is available, or another
    /// consumer already holds it, the feature logs and disables itself
    /// rather than failing the host process.
    pub fn setup(&self) {
        if self.setup_done.swap(true, Ordering::SeqCst) {
            return;
        }

        let capture_all = self.shared.options.capture_all_exceptions;

        let on_pause: OnPause = {
            let shared = Arc::clone(&self.shared);
            Box::new(move |event, resume| shared.handle_paused(event, resume))
        };

        let connected = weak_error!(
            self.shared.session.configure_and_connect(on_pause, capture_all),
            "local variable capture is disabled:"
        );
        if connected.is_none() {
            return;
        }

        // the limiter only throttles capture of caught exceptions, by
        // switching what triggers a pause; uncaught capture stays on
        if capture_all {
            let limiter = RateLimiter::start(
                self.shared.options.max_exceptions_per_second,
                RATE_LIMIT_TICK,
                {
                    let session = Arc::clone(&self.shared.session);
                    move || {
                        lv_info!(target: "localvars", "local variables rate-limit lifted");
                        session.set_pause_on_exceptions(true);
                    }
                },
                {
                    let session = Arc::clone(&self.shared.session);
                    move |seconds| {
                        lv_info!(
                            target: "localvars",
                            "local variables rate-limit exceeded, disabling caught exception capture for {seconds} seconds"
                        );
                        session.set_pause_on_exceptions(false);
                    }
                },
            );

            if let Ok(mut slot) = self.shared.limiter.lock() {
                *slot = Some(limiter);
            }
        }

        self.active.store(true, Ordering::SeqCst);
    }

    /// Splice captured variables into every matching frame of the event.
    /// A pass-through when setup did not complete.
    pub fn process_event(&self, event: &mut Event) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }

        for exception in &mut event.exceptions {
            self.shared.add_local_variables_to_exception(exception);
        }
    }
}
