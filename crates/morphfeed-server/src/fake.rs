//! Value generators backing scalar rule bindings.

use chrono::{SecondsFormat, Utc};
use morphfeed_morph::{MorphError, Regenerator, regenerator};
use rand::Rng;
use rand::seq::IndexedRandom;
use serde_json::{Number, Value};
use uuid::Uuid;

use crate::config::FakeSpec;

/// Wrap `spec` as a [`Regenerator`] for a scalar rule.
pub fn regenerator_for(spec: &FakeSpec) -> Regenerator {
    let spec = spec.clone();
    regenerator(move |previous: Option<Value>| {
        let generated = generate(&spec, previous.as_ref(), &mut rand::rng());
        std::future::ready(generated)
    })
}

/// Produce one value for `spec`. `previous` is the property's current
/// value, if any.
///
/// # Errors
///
/// Returns [`MorphError::Generator`] when the spec cannot produce a value
/// (an empty range, an empty choice, or an overflowing increment).
pub fn generate<R: Rng + ?Sized>(
    spec: &FakeSpec,
    previous: Option<&Value>,
    rng: &mut R,
) -> Result<Value, MorphError> {
    match spec {
        FakeSpec::Integer { min, max } => {
            if min > max {
                return Err(MorphError::generator(format!("empty integer range {min}..={max}")));
            }
            Ok(Value::from(rng.random_range(*min..=*max)))
        }
        FakeSpec::Float { min, max } => {
            if !(min.is_finite() && max.is_finite() && min <= max) {
                return Err(MorphError::generator(format!("bad float range {min}..{max}")));
            }
            let x = if min < max { rng.random_range(*min..*max) } else { *min };
            float(x)
        }
        FakeSpec::Choice { values } => values
            .choose(rng)
            .cloned()
            .ok_or_else(|| MorphError::generator("nothing to choose from")),
        FakeSpec::Uuid => Ok(Value::String(Uuid::new_v4().to_string())),
        FakeSpec::Timestamp => Ok(Value::String(
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        )),
        FakeSpec::Increment { step } => increment(previous, *step),
    }
}

fn increment(previous: Option<&Value>, step: i64) -> Result<Value, MorphError> {
    match previous {
        Some(Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                i.checked_add(step)
                    .map(Value::from)
                    .ok_or_else(|| MorphError::generator(format!("{i} + {step} overflows")))
            } else {
                #[allow(clippy::cast_precision_loss)]
                let step = step as f64;
                float(n.as_f64().unwrap_or_default() + step)
            }
        }
        _ => Ok(Value::from(step)),
    }
}

fn float(x: f64) -> Result<Value, MorphError> {
    Number::from_f64(x)
        .map(Value::Number)
        .ok_or_else(|| MorphError::generator(format!("{x} is not representable in JSON")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use serde_json::json;

    use super::*;

    #[test]
    fn integers_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(1);
        let spec = FakeSpec::Integer { min: -2, max: 2 };
        for _ in 0..200 {
            let n = generate(&spec, None, &mut rng).unwrap().as_i64().unwrap();
            assert!((-2..=2).contains(&n));
        }
    }

    #[test]
    fn floats_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(2);
        let spec = FakeSpec::Float { min: 1.0, max: 2.0 };
        for _ in 0..200 {
            let x = generate(&spec, None, &mut rng).unwrap().as_f64().unwrap();
            assert!((1.0..2.0).contains(&x));
        }
    }

    #[test]
    fn degenerate_float_range_yields_its_bound() {
        let mut rng = StdRng::seed_from_u64(3);
        let spec = FakeSpec::Float { min: 4.5, max: 4.5 };
        assert_eq!(generate(&spec, None, &mut rng).unwrap(), json!(4.5));
    }

    #[test]
    fn empty_ranges_are_generator_errors() {
        let mut rng = StdRng::seed_from_u64(4);
        let bad = [
            FakeSpec::Integer { min: 3, max: 1 },
            FakeSpec::Float { min: 3.0, max: 1.0 },
            FakeSpec::Choice { values: Vec::new() },
        ];
        for spec in &bad {
            assert!(matches!(
                generate(spec, None, &mut rng),
                Err(MorphError::Generator { .. })
            ));
        }
    }

    #[test]
    fn choice_picks_a_listed_value() {
        let mut rng = StdRng::seed_from_u64(5);
        let values = vec![json!("open"), json!("closed")];
        let spec = FakeSpec::Choice { values: values.clone() };
        for _ in 0..20 {
            assert!(values.contains(&generate(&spec, None, &mut rng).unwrap()));
        }
    }

    #[test]
    fn uuids_and_timestamps_are_strings() {
        let mut rng = StdRng::seed_from_u64(6);
        let id = generate(&FakeSpec::Uuid, None, &mut rng).unwrap();
        assert!(Uuid::parse_str(id.as_str().unwrap()).is_ok());

        let ts = generate(&FakeSpec::Timestamp, None, &mut rng).unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(ts.as_str().unwrap()).is_ok());
    }

    #[test]
    fn increment_builds_on_the_previous_value() {
        let mut rng = StdRng::seed_from_u64(7);
        let spec = FakeSpec::Increment { step: 5 };

        assert_eq!(generate(&spec, Some(&json!(10)), &mut rng).unwrap(), json!(15));
        assert_eq!(generate(&spec, Some(&json!(0.5)), &mut rng).unwrap(), json!(5.5));
        assert_eq!(generate(&spec, None, &mut rng).unwrap(), json!(5));
        assert_eq!(generate(&spec, Some(&json!("x")), &mut rng).unwrap(), json!(5));
        assert!(generate(&spec, Some(&json!(i64::MAX)), &mut rng).is_err());
    }

    #[tokio::test]
    async fn regenerator_passes_the_previous_value() {
        let regenerate = regenerator_for(&FakeSpec::Increment { step: 1 });
        assert_eq!(regenerate(Some(json!(41))).await.unwrap(), json!(42));
    }
}
