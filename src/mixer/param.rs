//! Gain automation timeline
//!
//! A parameter is a sorted list of scheduled events on the context clock.
//! The value at any instant is the last event's value, or a linear
//! interpolation when a ramp is in progress. Every gain change in the mixer
//! goes through `ramp_to`, which is the cancel / anchor / ramp sequence that
//! keeps gain continuous.

/// One scheduled automation event
#[derive(Debug, Clone, Copy, PartialEq)]
enum ParamEvent {
    /// Jump to `value` at `time`
    SetValue { time: f64, value: f32 },
    /// Arrive at `value` at `time`, moving linearly from the previous event
    LinearRamp { time: f64, value: f32 },
}

impl ParamEvent {
    fn time(&self) -> f64 {
        match *self {
            ParamEvent::SetValue { time, .. } | ParamEvent::LinearRamp { time, .. } => time,
        }
    }

    fn value(&self) -> f32 {
        match *self {
            ParamEvent::SetValue { value, .. } | ParamEvent::LinearRamp { value, .. } => value,
        }
    }
}

/// An automatable parameter such as a gain
///
/// # Example
/// ```
/// use soundscape::mixer::AudioParam;
///
/// let mut gain = AudioParam::new(0.0);
/// gain.ramp_to(1.0, 0.0, 0.1);
/// assert!((gain.value_at(0.05) - 0.5).abs() < 1e-6);
/// assert_eq!(gain.value_at(0.2), 1.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AudioParam {
    initial: f32,
    events: Vec<ParamEvent>,
}

impl AudioParam {
    /// Create a parameter holding `initial` until something is scheduled
    pub fn new(initial: f32) -> Self {
        Self {
            initial,
            events: Vec::new(),
        }
    }

    /// Schedule an instantaneous change
    pub fn set_value_at_time(&mut self, value: f32, time: f64) {
        self.insert(ParamEvent::SetValue { time, value });
    }

    /// Schedule a linear ramp that ends at `time`
    ///
    /// The ramp starts at the time and value of the preceding event.
    pub fn linear_ramp_to_value_at_time(&mut self, value: f32, time: f64) {
        self.insert(ParamEvent::LinearRamp { time, value });
    }

    /// Drop every event scheduled at or after `time`
    pub fn cancel_scheduled_values(&mut self, time: f64) {
        self.events.retain(|event| event.time() < time);
    }

    /// Replace any pending automation with a ramp from the current value
    ///
    /// Cancels what is scheduled from `now`, anchors the instantaneous value
    /// at `now`, then ramps to `target` over `duration` seconds.
    pub fn ramp_to(&mut self, target: f32, now: f64, duration: f64) {
        let current = self.value_at(now);
        self.cancel_scheduled_values(now);
        self.set_value_at_time(current, now);
        self.linear_ramp_to_value_at_time(target, now + duration.max(0.0));
    }

    /// Value of the parameter at `time`
    pub fn value_at(&self, time: f64) -> f32 {
        let mut prev_time = 0.0;
        let mut prev_value = self.initial;

        for event in &self.events {
            match *event {
                ParamEvent::SetValue { time: at, value } => {
                    if at > time {
                        break;
                    }
                    prev_time = at;
                    prev_value = value;
                }
                ParamEvent::LinearRamp { time: end, value } => {
                    if end > time {
                        let span = end - prev_time;
                        if span <= 0.0 || time < prev_time {
                            return prev_value;
                        }
                        let progress = ((time - prev_time) / span) as f32;
                        return prev_value + (value - prev_value) * progress;
                    }
                    prev_time = end;
                    prev_value = value;
                }
            }
        }

        prev_value
    }

    /// Value the parameter settles at once all automation has run
    pub fn final_value(&self) -> f32 {
        self.events.last().map(|e| e.value()).unwrap_or(self.initial)
    }

    /// Collapse events that lie entirely in the past into the initial value
    ///
    /// Keeps the last past event as an anchor so a ramp in progress still
    /// interpolates from the right starting point.
    pub fn prune_before(&mut self, time: f64) {
        let past = self.events.partition_point(|event| event.time() <= time);
        if past <= 1 {
            return;
        }
        let anchor = self.events[past - 1];
        self.initial = anchor.value();
        self.events.drain(..past - 1);
        self.events[0] = ParamEvent::SetValue {
            time: anchor.time(),
            value: anchor.value(),
        };
    }

    /// Number of scheduled events
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    fn insert(&mut self, event: ParamEvent) {
        let index = self
            .events
            .partition_point(|existing| existing.time() <= event.time());
        self.events.insert(index, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_holds_initial_value() {
        let param = AudioParam::new(0.7);
        assert_eq!(param.value_at(0.0), 0.7);
        assert_eq!(param.value_at(100.0), 0.7);
        assert_eq!(param.event_count(), 0);
    }

    #[test]
    fn test_linear_ramp_interpolates() {
        let mut param = AudioParam::new(0.0);
        param.set_value_at_time(0.0, 1.0);
        param.linear_ramp_to_value_at_time(0.8, 1.2);

        assert_relative_eq!(param.value_at(1.0), 0.0);
        assert_relative_eq!(param.value_at(1.1), 0.4, epsilon = 1e-5);
        assert_relative_eq!(param.value_at(1.2), 0.8);
        assert_relative_eq!(param.value_at(5.0), 0.8);
    }

    #[test]
    fn test_ramp_to_starts_from_mid_ramp_value() {
        let mut param = AudioParam::new(0.0);
        param.ramp_to(1.0, 0.0, 0.1);

        // Interrupt halfway; the new ramp must start at 0.5, not jump
        param.ramp_to(0.0, 0.05, 0.1);
        assert_relative_eq!(param.value_at(0.05), 0.5, epsilon = 1e-5);
        assert_relative_eq!(param.value_at(0.1), 0.25, epsilon = 1e-5);
        assert_relative_eq!(param.value_at(0.15), 0.0, epsilon = 1e-5);
        assert_eq!(param.final_value(), 0.0);
    }

    #[test]
    fn test_cancel_removes_future_events() {
        let mut param = AudioParam::new(0.2);
        param.set_value_at_time(0.5, 1.0);
        param.set_value_at_time(0.9, 2.0);
        param.cancel_scheduled_values(1.5);

        assert_eq!(param.event_count(), 1);
        assert_eq!(param.value_at(3.0), 0.5);
    }

    #[test]
    fn test_latest_ramp_wins() {
        let mut param = AudioParam::new(0.0);
        param.ramp_to(0.9, 0.0, 0.02);
        param.ramp_to(0.3, 0.0, 0.02);
        assert_relative_eq!(param.value_at(1.0), 0.3);
    }

    #[test]
    fn test_sampled_ramp_never_jumps_more_than_one_step() {
        let mut param = AudioParam::new(0.0);
        let ramp = 0.02;
        let step = 0.001;
        param.ramp_to(1.0, 0.0, ramp);

        let max_jump = (1.0 / (ramp / step)) as f32 + 1e-4;
        let mut previous = param.value_at(0.0);
        for i in 1..40 {
            let value = param.value_at(i as f64 * step);
            assert!(
                (value - previous).abs() <= max_jump,
                "jump of {} at step {}",
                (value - previous).abs(),
                i
            );
            previous = value;
        }
    }

    #[test]
    fn test_prune_keeps_ramp_in_progress() {
        let mut param = AudioParam::new(0.0);
        param.set_value_at_time(0.1, 0.0);
        param.set_value_at_time(0.2, 0.5);
        param.set_value_at_time(0.4, 1.0);
        param.linear_ramp_to_value_at_time(0.8, 2.0);

        let before = param.value_at(1.5);
        param.prune_before(1.5);
        assert_eq!(param.event_count(), 2);
        assert_relative_eq!(param.value_at(1.5), before, epsilon = 1e-6);
        assert_relative_eq!(param.value_at(2.0), 0.8);
    }
}
