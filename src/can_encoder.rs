use crate::can_decoder::{is_active, multiplexor, SignalsMap};
use crate::errors::EncodeError;
use crate::signal_layout::SignalLayout;

/// Raw bits for `physical`: `(physical - offset) / factor`, rounded and cut
/// to the signal width. Negative values of signed signals keep their two's
/// complement bits.
pub fn compute_raw_value(physical: f64, spec: &can_dbc::Signal) -> u64 {
    let scaled = (physical - spec.offset()) / spec.factor();
    SignalLayout::from_spec(spec).integer_to_raw(scaled)
}

/// Reject values outside the declared range. A `[0|0]` range means "unbounded".
fn check_range(physical: f64, spec: &can_dbc::Signal) -> Result<(), EncodeError> {
    let (min, max) = (*spec.min(), *spec.max());
    if min >= max {
        return Ok(());
    }
    // Half a step of slack for values that do not sit exactly on the grid
    let slack = spec.factor().abs() / 2.0;
    if physical < min - slack || physical > max + slack {
        return Err(EncodeError::OutOfRange {
            signal: spec.name().to_string(),
            value: physical,
            min,
            max,
        });
    }
    Ok(())
}

/// Encode a full message from signal name/value pairs into payload bytes.
///
/// Every live signal must be given a value and every given name must exist in
/// the message. The payload is `message_size` bytes long.
pub fn encode_message(
    message_spec: &can_dbc::Message,
    signals: &SignalsMap,
) -> Result<Vec<u8>, EncodeError> {
    let message = message_spec.message_name();

    for name in signals.names() {
        if !message_spec.signals().iter().any(|s| s.name() == name) {
            return Err(EncodeError::UnknownSignal {
                message: message.to_string(),
                signal: name.to_string(),
            });
        }
    }

    let mux_value = match multiplexor(message_spec) {
        Some(mux) => {
            let physical = signals.get(mux.name()).ok_or_else(|| EncodeError::MissingSignal {
                message: message.to_string(),
                signal: mux.name().to_string(),
            })?;
            Some(compute_raw_value(physical, mux))
        }
        None => None,
    };

    let mut data = vec![0u8; *message_spec.message_size() as usize];
    for spec in message_spec.signals() {
        if !is_active(spec, mux_value) {
            continue;
        }
        let physical = signals
            .get(spec.name())
            .ok_or_else(|| EncodeError::MissingSignal {
                message: message.to_string(),
                signal: spec.name().to_string(),
            })?;
        check_range(physical, spec)?;
        let raw = compute_raw_value(physical, spec);
        SignalLayout::from_spec(spec).pack(&mut data, raw);
    }

    Ok(data)
}
