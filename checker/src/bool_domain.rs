// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use log_derive::logfn_inputs;
use serde::{Deserialize, Serialize};

/// A standard set-based abstraction for Booleans. `Bottom` represents the empty set,
/// `False` and `True` represent singleton sets {false} and {true}, respectively, and
/// `Top` represents {false, true}. Comparisons between intervals evaluate to elements
/// of this domain, and the checker uses it to classify bound checks.
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Copy, Clone, Serialize, Deserialize, Hash)]
pub enum BoolDomain {
    Bottom,
    False,
    True,
    Top,
}

impl From<bool> for BoolDomain {
    #[logfn_inputs(TRACE)]
    fn from(b: bool) -> BoolDomain {
        if b {
            BoolDomain::True
        } else {
            BoolDomain::False
        }
    }
}

/// Transfer functions
impl BoolDomain {
    /// Return the join of two Boolean domain elements, which is essentially the set union.
    #[logfn_inputs(TRACE)]
    #[must_use]
    pub fn join(&self, other: &Self) -> Self {
        match (self, other) {
            (BoolDomain::Top, _)
            | (_, BoolDomain::Top)
            | (BoolDomain::False, BoolDomain::True)
            | (BoolDomain::True, BoolDomain::False) => BoolDomain::Top,
            (BoolDomain::False, _) | (_, BoolDomain::False) => BoolDomain::False,
            (BoolDomain::True, _) | (_, BoolDomain::True) => BoolDomain::True,
            (BoolDomain::Bottom, BoolDomain::Bottom) => BoolDomain::Bottom,
        }
    }

    /// Return the logical-and of two Boolean domain elements.
    #[logfn_inputs(TRACE)]
    #[must_use]
    pub fn and(&self, other: &Self) -> Self {
        match (self, other) {
            (BoolDomain::Bottom, _) | (_, BoolDomain::Bottom) => BoolDomain::Bottom,
            (BoolDomain::False, _) | (_, BoolDomain::False) => BoolDomain::False,
            (BoolDomain::Top, _) | (_, BoolDomain::Top) => BoolDomain::Top,
            (BoolDomain::True, BoolDomain::True) => BoolDomain::True,
        }
    }

    /// Return the logical-or of two Boolean domain elements.
    #[logfn_inputs(TRACE)]
    #[must_use]
    pub fn or(&self, other: &Self) -> Self {
        match (self, other) {
            (BoolDomain::Bottom, _) | (_, BoolDomain::Bottom) => BoolDomain::Bottom,
            (BoolDomain::True, _) | (_, BoolDomain::True) => BoolDomain::True,
            (BoolDomain::Top, _) | (_, BoolDomain::Top) => BoolDomain::Top,
            (BoolDomain::False, BoolDomain::False) => BoolDomain::False,
        }
    }

    /// Return the logical negation of a Boolean domain element.
    #[must_use]
    pub fn not(&self) -> Self {
        match self {
            BoolDomain::True => BoolDomain::False,
            BoolDomain::False => BoolDomain::True,
            other => *other,
        }
    }

    /// True if the element is the singleton {true}.
    pub fn is_true(&self) -> bool {
        *self == BoolDomain::True
    }

    /// True if the element is the singleton {false}.
    pub fn is_false(&self) -> bool {
        *self == BoolDomain::False
    }
}
