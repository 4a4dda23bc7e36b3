//! Window → feature vector reduction.
//!
//! Extraction is a pure reduction over the samples in a primed window. Every
//! aggregate is order-independent, so two windows holding the same multiset of
//! readings produce the same vector.

pub mod stats;

use serde::{Deserialize, Serialize};

use self::stats::Series;
use crate::ingest::Sample;
use crate::window::Window;

/// Number of values in a [`FeatureVector`].
pub const FEATURE_COUNT: usize = 10;

/// Fixed-size summary of one window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub vib_mean: f64,
    pub vib_std: f64,
    pub vib_max: f64,
    pub vib_min: f64,

    pub gas_mean: f64,
    pub gas_std: f64,
    pub gas_max: f64,

    /// Number of passive-infrared events in the window.
    pub pir_count: f64,
    pub temp_mean: f64,
    pub people_max: f64,
}

impl FeatureVector {
    /// Values in model input order.
    pub fn to_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.vib_mean, self.vib_std, self.vib_max, self.vib_min,
            self.gas_mean, self.gas_std, self.gas_max,
            self.pir_count, self.temp_mean, self.people_max,
        ]
    }

    pub fn from_array(v: [f64; FEATURE_COUNT]) -> Self {
        Self {
            vib_mean: v[0],
            vib_std: v[1],
            vib_max: v[2],
            vib_min: v[3],
            gas_mean: v[4],
            gas_std: v[5],
            gas_max: v[6],
            pir_count: v[7],
            temp_mean: v[8],
            people_max: v[9],
        }
    }
}

/// Reduce a primed window to its feature vector.
///
/// # Panics
///
/// Panics if the window is not full. The window manager only extracts on a
/// trigger, so a partial window here is a bug in the trigger logic.
pub fn extract(window: &Window) -> FeatureVector {
    assert!(
        window.is_primed(),
        "feature extraction on a partial window ({} of {} samples)",
        window.len(),
        window.capacity()
    );
    reduce(window.samples())
}

fn reduce<'a>(samples: impl Iterator<Item = &'a Sample> + Clone) -> FeatureVector {
    let column = |pick: fn(&Sample) -> f64| {
        Series::new(samples.clone().map(pick).map(finite_or_zero).collect())
    };

    let vib = column(|s| s.fields.vib);
    let gas = column(|s| s.fields.gas);
    let pir = column(|s| s.fields.pir);
    let temp = column(|s| s.fields.temp);
    let people = column(|s| s.fields.people);

    let vector = FeatureVector {
        vib_mean: vib.mean(),
        vib_std: vib.std_dev(),
        vib_max: vib.max(),
        vib_min: vib.min(),
        gas_mean: gas.mean(),
        gas_std: gas.std_dev(),
        gas_max: gas.max(),
        pir_count: pir.sum(),
        temp_mean: temp.mean(),
        people_max: people.max(),
    };
    FeatureVector::from_array(vector.to_array().map(finite_or_zero))
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}
