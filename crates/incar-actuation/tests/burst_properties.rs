use incar_actuation::{BurstPlan, Direction, can_step};
use incar_telemetry::{ControlDescriptor, ValueKind};
use proptest::prelude::*;

fn descriptor(steps: u32, step: f64, position: u32) -> ControlDescriptor {
    let max = f64::from(steps) * step;
    let value = f64::from(position.min(steps)) * step;
    ControlDescriptor::new("dcProp", ValueKind::Float, 0.0, max, step, value)
}

fn step_size() -> impl Strategy<Value = f64> {
    prop_oneof![Just(0.1), Just(0.25), Just(0.5), Just(1.0), Just(2.0)]
}

proptest! {
    #[test]
    fn pulse_count_covers_the_distance_without_an_extra_step(
        steps in 1u32..200,
        step in step_size(),
        from in 0u32..200,
        to in 0u32..200,
    ) {
        let control = descriptor(steps, step, from);
        let target = f64::from(to.min(steps)) * step;
        let plan = BurstPlan::compute(&control, target)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;

        let distance = (target - control.current_value).abs();
        let covered = f64::from(plan.pulses) * step;
        prop_assert!(covered + 1e-6 >= distance);
        if plan.pulses > 0 {
            prop_assert!(f64::from(plan.pulses - 1) * step < distance);
        } else {
            prop_assert!(distance < step);
        }
    }

    #[test]
    fn targets_outside_the_range_are_refused(
        steps in 1u32..50,
        step in step_size(),
        beyond in 0.01f64..100.0,
    ) {
        let control = descriptor(steps, step, 0);
        prop_assert!(BurstPlan::compute(&control, control.max_value + beyond).is_err());
        prop_assert!(BurstPlan::compute(&control, control.min_value - beyond).is_err());
    }

    #[test]
    fn permitted_steps_stay_inside_the_range(
        steps in 1u32..50,
        step in step_size(),
        position in 0u32..50,
        increase in any::<bool>(),
    ) {
        let control = descriptor(steps, step, position);
        let direction = if increase { Direction::Increase } else { Direction::Decrease };
        if can_step(&control, control.current_value, direction) {
            let next = control.current_value + direction.sign() * step;
            prop_assert!(next >= control.min_value - control.tolerance());
            prop_assert!(next <= control.max_value + control.tolerance());
        }
    }
}
