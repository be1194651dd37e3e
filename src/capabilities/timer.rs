use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};

/// Handle for one scheduled timer. Ids are allocated by the model and never
/// reused within a process, so a firing for an id the model no longer tracks
/// can be discarded as stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimerId(pub u64);

impl std::fmt::Display for TimerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "data")]
pub enum TimerOperation {
    /// Arm a one-shot timer. The shell resolves the request with `Fired`
    /// after `millis`, or with `Cancelled` if a matching `Cancel` arrives
    /// first.
    Start { id: TimerId, millis: u64 },
    /// Cancel a previously started timer. No-op if it already fired.
    Cancel { id: TimerId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TimerOutput {
    Fired { id: TimerId },
    Cancelled { id: TimerId },
}

impl TimerOutput {
    #[must_use]
    pub const fn id(self) -> TimerId {
        match self {
            Self::Fired { id } | Self::Cancelled { id } => id,
        }
    }

    #[must_use]
    pub const fn is_fired(self) -> bool {
        matches!(self, Self::Fired { .. })
    }
}

impl Operation for TimerOperation {
    type Output = TimerOutput;
}

pub struct Timer<Ev> {
    context: CapabilityContext<TimerOperation, Ev>,
}

impl<Ev> Clone for Timer<Ev> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
        }
    }
}

impl<Ev> Capability<Ev> for Timer<Ev> {
    type Operation = TimerOperation;
    type MappedSelf<MappedEv> = Timer<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static,
    {
        Timer::new(self.context.map_event(f))
    }
}

impl<Ev> Timer<Ev>
where
    Ev: 'static,
{
    pub fn new(context: CapabilityContext<TimerOperation, Ev>) -> Self {
        Self { context }
    }

    /// Arm a one-shot timer. The callback receives `Fired` or `Cancelled`.
    pub fn start<F>(&self, id: TimerId, millis: u64, make_event: F)
    where
        F: Fn(TimerOutput) -> Ev + Send + Sync + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            let output = context
                .request_from_shell(TimerOperation::Start { id, millis })
                .await;
            context.update_app(make_event(output));
        });
    }

    /// Cancel a timer. Fire-and-forget: the armed timer resolves as
    /// `Cancelled` through its own callback.
    pub fn cancel(&self, id: TimerId) {
        let context = self.context.clone();
        self.context.spawn(async move {
            context.notify_shell(TimerOperation::Cancel { id }).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_reports_id_for_both_variants() {
        let id = TimerId(7);
        assert_eq!(TimerOutput::Fired { id }.id(), id);
        assert_eq!(TimerOutput::Cancelled { id }.id(), id);
    }

    #[test]
    fn fired_and_cancelled_are_distinguishable() {
        let id = TimerId(1);
        assert!(TimerOutput::Fired { id }.is_fired());
        assert!(!TimerOutput::Cancelled { id }.is_fired());
    }

    #[test]
    fn operation_round_trips_through_serde() {
        let op = TimerOperation::Start {
            id: TimerId(42),
            millis: 30_000,
        };
        let json = serde_json::to_string(&op).unwrap();
        let back: TimerOperation = serde_json::from_str(&json).unwrap();
        assert_eq!(op, back);
    }
}
