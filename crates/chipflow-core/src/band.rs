use serde::{Deserialize, Serialize};

/// Spectral bands reported by the change-detection algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    Blue,
    Green,
    Red,
    Nir,
    Swir1,
    Swir2,
    Thermal,
}

impl Band {
    /// Storage order. Feature vectors use their own order, see `features::FEATURE_BANDS`.
    pub const ALL: [Band; 7] = [
        Band::Blue,
        Band::Green,
        Band::Red,
        Band::Nir,
        Band::Swir1,
        Band::Swir2,
        Band::Thermal,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Band::Blue => "blue",
            Band::Green => "green",
            Band::Red => "red",
            Band::Nir => "nir",
            Band::Swir1 => "swir1",
            Band::Swir2 => "swir2",
            Band::Thermal => "thermal",
        }
    }

    fn index(self) -> usize {
        match self {
            Band::Blue => 0,
            Band::Green => 1,
            Band::Red => 2,
            Band::Nir => 3,
            Band::Swir1 => 4,
            Band::Swir2 => 5,
            Band::Thermal => 6,
        }
    }
}

/// Harmonic model fit for one band of one segment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BandFit {
    pub magnitude: f64,
    pub rmse: f64,
    pub intercept: f64,
    pub coefficients: Vec<f64>,
}

/// One `BandFit` per band, indexed by `Band`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BandSet {
    fits: [BandFit; 7],
}

impl BandSet {
    pub fn get(&self, band: Band) -> &BandFit {
        &self.fits[band.index()]
    }

    pub fn get_mut(&mut self, band: Band) -> &mut BandFit {
        &mut self.fits[band.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Band, &BandFit)> {
        Band::ALL.into_iter().map(|b| (b, self.get(b)))
    }
}
