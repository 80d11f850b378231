/*!
 * Decode CAN payloads into named physical signal values
 */

use std::collections::BTreeMap;
use std::fmt;

use crate::errors::DecodeError;
use crate::signal_layout::SignalLayout;

/// Signal name to physical value, ordered by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalsMap {
    values: BTreeMap<String, f64>,
}

impl SignalsMap {
    pub fn new(signals: &[(&str, f64)]) -> SignalsMap {
        signals.iter().map(|(name, value)| (*name, *value)).collect()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) -> Option<f64> {
        self.values.insert(name.into(), value)
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(name, value)| (name.as_str(), *value))
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for SignalsMap {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        SignalsMap {
            values: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        }
    }
}

impl fmt::Display for SignalsMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "'{}': {}", name, value)?;
        }
        f.write_str("}")
    }
}

/// Physical value of one signal: raw * factor + offset.
pub fn decode_signal(data: &[u8], spec: &can_dbc::Signal) -> f64 {
    let layout = SignalLayout::from_spec(spec);
    layout.raw_to_integer(layout.extract(data)) * spec.factor() + spec.offset()
}

/// Which multiplexed signals are live for a given multiplexor value.
///
/// Plain signals and the multiplexor itself are always live. Without a
/// multiplexor value every signal counts as live.
pub(crate) fn is_active(spec: &can_dbc::Signal, mux_value: Option<u64>) -> bool {
    match (spec.multiplexer_indicator(), mux_value) {
        (can_dbc::MultiplexIndicator::MultiplexedSignal(v), Some(mux))
        | (can_dbc::MultiplexIndicator::MultiplexorAndMultiplexedSignal(v), Some(mux)) => {
            *v == mux
        }
        _ => true,
    }
}

/// The multiplexor signal of a message, if it has one.
pub(crate) fn multiplexor(message: &can_dbc::Message) -> Option<&can_dbc::Signal> {
    message.signals().iter().find(|signal| {
        matches!(
            signal.multiplexer_indicator(),
            can_dbc::MultiplexIndicator::Multiplexor
        )
    })
}

/// Decode every live signal of `message` from `data`.
///
/// The payload must cover the message size; bytes past it are ignored.
pub fn decode_message(message: &can_dbc::Message, data: &[u8]) -> Result<SignalsMap, DecodeError> {
    let expected = *message.message_size() as usize;
    if data.len() < expected {
        return Err(DecodeError::PayloadTooShort {
            message: message.message_name().to_string(),
            expected,
            actual: data.len(),
        });
    }
    let data = &data[..expected];

    let mux_value = multiplexor(message).map(|mux| SignalLayout::from_spec(mux).extract(data));

    Ok(message
        .signals()
        .iter()
        .filter(|signal| is_active(signal, mux_value))
        .map(|signal| (signal.name().as_str(), decode_signal(data, signal)))
        .collect())
}
