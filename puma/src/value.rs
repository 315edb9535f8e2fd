// SPDX-License-Identifier: GPL-3.0-or-later

//! The unit of data that flows through a `Buffer`.

use crate::error::PumaError;
use serde::{Deserialize, Serialize};

/// Either a payload of the buffer's element type, or the terminal marker.
///
/// Once a `Complete` marker has been observed by a subscription, no
/// further `Value` is ever delivered (`spec.md` §3, invariant I4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value<T> {
    Data(T),
    Complete(Option<PumaError>),
}

impl<T> Value<T> {
    pub fn is_complete(&self) -> bool {
        matches!(self, Value::Complete(_))
    }

    pub fn as_data(&self) -> Option<&T> {
        match self {
            Value::Data(v) => Some(v),
            Value::Complete(_) => None,
        }
    }
}
