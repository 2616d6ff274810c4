//! Host-driven retry/timeout state machine for one request/response exchange.
//!
//! The host owns the socket: it asks the exchange what to do next, performs the I/O,
//! and reports the outcome back. No I/O and no clocks in here.
//!
//! `Idle → Sending → AwaitingReply → {Applied | TimedOut} → (retry → Sending | Done)`

use std::time::Duration;

use crate::protocol::RequestKind;

/// Timeout and retry budget for one kind of request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub receive_timeout: Duration,
    pub retry_delay: Duration,
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Idle,
    Sending { attempt: u32 },
    AwaitingReply { attempt: u32 },
    /// A reply arrived and was handed to the registry. Terminal.
    Applied,
    TimedOut { attempt: u32 },
    /// Retries exhausted. Terminal.
    Done,
}

/// What the host should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Send the request (attempt numbers start at 1).
    Send { attempt: u32 },
    /// Wait for a reply for at most this long.
    AwaitReply { timeout: Duration },
    /// Tear down and recreate the endpoint, wait `delay`, then call `retry`.
    RetryAfter { delay: Duration },
    /// The reply was applied.
    Complete { attempts: u32 },
    /// Every attempt timed out.
    Exhausted { attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ExchangeError {
    #[error("invalid transition: {event} while {state:?}")]
    InvalidTransition {
        state: ExchangeState,
        event: &'static str,
    },
}

pub struct ControlExchange {
    kind: RequestKind,
    policy: RetryPolicy,
    state: ExchangeState,
    attempts: u32,
}

impl ControlExchange {
    pub fn new(kind: RequestKind, policy: RetryPolicy) -> Self {
        Self {
            kind,
            policy,
            state: ExchangeState::Idle,
            attempts: 0,
        }
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// Attempts started so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, ExchangeState::Applied | ExchangeState::Done)
    }

    fn invalid(&self, event: &'static str) -> ExchangeError {
        ExchangeError::InvalidTransition {
            state: self.state,
            event,
        }
    }

    fn next_attempt(&mut self) -> Step {
        self.attempts += 1;
        self.state = ExchangeState::Sending {
            attempt: self.attempts,
        };
        Step::Send {
            attempt: self.attempts,
        }
    }

    /// Idle → Sending.
    pub fn begin(&mut self) -> Result<Step, ExchangeError> {
        match self.state {
            ExchangeState::Idle => Ok(self.next_attempt()),
            _ => Err(self.invalid("begin")),
        }
    }

    /// Sending → AwaitingReply.
    pub fn on_sent(&mut self) -> Result<Step, ExchangeError> {
        match self.state {
            ExchangeState::Sending { attempt } => {
                self.state = ExchangeState::AwaitingReply { attempt };
                Ok(Step::AwaitReply {
                    timeout: self.policy.receive_timeout,
                })
            }
            _ => Err(self.invalid("sent")),
        }
    }

    /// AwaitingReply → Applied.
    pub fn on_reply(&mut self) -> Result<Step, ExchangeError> {
        match self.state {
            ExchangeState::AwaitingReply { .. } => {
                self.state = ExchangeState::Applied;
                Ok(Step::Complete {
                    attempts: self.attempts,
                })
            }
            _ => Err(self.invalid("reply")),
        }
    }

    /// AwaitingReply → TimedOut, or → Done once the retry budget is spent.
    pub fn on_timeout(&mut self) -> Result<Step, ExchangeError> {
        match self.state {
            ExchangeState::AwaitingReply { attempt } => {
                if attempt < self.policy.max_attempts() {
                    self.state = ExchangeState::TimedOut { attempt };
                    Ok(Step::RetryAfter {
                        delay: self.policy.retry_delay,
                    })
                } else {
                    self.state = ExchangeState::Done;
                    Ok(Step::Exhausted {
                        attempts: self.attempts,
                    })
                }
            }
            _ => Err(self.invalid("timeout")),
        }
    }

    /// TimedOut → Sending.
    pub fn retry(&mut self) -> Result<Step, ExchangeError> {
        match self.state {
            ExchangeState::TimedOut { .. } => Ok(self.next_attempt()),
            _ => Err(self.invalid("retry")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            receive_timeout: Duration::from_millis(3000),
            retry_delay: Duration::from_millis(1000),
        }
    }

    /// Drive an exchange whose peer never answers; count the sends.
    fn sends_until_exhausted(max_retries: u32) -> u32 {
        let mut ex = ControlExchange::new(RequestKind::Connect, policy(max_retries));
        let mut sends = 0;
        let mut step = ex.begin().unwrap();
        loop {
            step = match step {
                Step::Send { .. } => {
                    sends += 1;
                    ex.on_sent().unwrap()
                }
                Step::AwaitReply { .. } => ex.on_timeout().unwrap(),
                Step::RetryAfter { .. } => ex.retry().unwrap(),
                Step::Exhausted { attempts } => {
                    assert_eq!(attempts, sends);
                    return sends;
                }
                Step::Complete { .. } => panic!("nobody replied"),
            };
        }
    }

    #[test]
    fn retry_bound() {
        assert_eq!(sends_until_exhausted(3), 4);
        assert_eq!(sends_until_exhausted(0), 1);
        assert_eq!(sends_until_exhausted(1), 2);
    }

    #[test]
    fn reply_on_first_attempt() {
        let mut ex = ControlExchange::new(RequestKind::Probe, policy(1));
        assert_eq!(ex.state(), ExchangeState::Idle);
        assert_eq!(ex.begin().unwrap(), Step::Send { attempt: 1 });
        assert_eq!(
            ex.on_sent().unwrap(),
            Step::AwaitReply {
                timeout: Duration::from_millis(3000)
            }
        );
        assert_eq!(ex.state(), ExchangeState::AwaitingReply { attempt: 1 });
        assert_eq!(ex.on_reply().unwrap(), Step::Complete { attempts: 1 });
        assert!(ex.is_terminal());
        assert_eq!(ex.state(), ExchangeState::Applied);
    }

    #[test]
    fn reply_after_retry() {
        let mut ex = ControlExchange::new(RequestKind::Connect, policy(3));
        ex.begin().unwrap();
        ex.on_sent().unwrap();
        assert_eq!(
            ex.on_timeout().unwrap(),
            Step::RetryAfter {
                delay: Duration::from_millis(1000)
            }
        );
        assert_eq!(ex.state(), ExchangeState::TimedOut { attempt: 1 });
        assert_eq!(ex.retry().unwrap(), Step::Send { attempt: 2 });
        ex.on_sent().unwrap();
        assert_eq!(ex.on_reply().unwrap(), Step::Complete { attempts: 2 });
    }

    #[test]
    fn terminal_states_reject_events() {
        let mut ex = ControlExchange::new(RequestKind::Disconnect, policy(0));
        assert!(ex.on_sent().is_err());
        ex.begin().unwrap();
        assert!(ex.begin().is_err());
        assert!(ex.on_reply().is_err());
        ex.on_sent().unwrap();
        assert_eq!(ex.on_timeout().unwrap(), Step::Exhausted { attempts: 1 });
        assert_eq!(ex.state(), ExchangeState::Done);
        assert!(matches!(
            ex.retry(),
            Err(ExchangeError::InvalidTransition {
                state: ExchangeState::Done,
                event: "retry"
            })
        ));
        assert!(ex.on_reply().is_err());
    }
}
