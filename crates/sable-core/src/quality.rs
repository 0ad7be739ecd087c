//! Quality catalog
//!
//! Holds the device-playable renditions of the loaded source, the advisory
//! ABR ceilings and the manual pin.

use crate::{types::Quality, Error, Result};
use tracing::{debug, info};

/// Device capability check, decided outside the engine
pub trait DeviceCapabilities: Send + Sync {
    /// True if the device can decode and render this quality
    fn can_play(&self, quality: &Quality) -> bool;
}

/// Accepts every quality
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyDevice;

impl DeviceCapabilities for AnyDevice {
    fn can_play(&self, _quality: &Quality) -> bool {
        true
    }
}

/// Advisory ceilings applied to every ABR decision
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QualityConstraints {
    pub max_bitrate: Option<u64>,
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
}

impl QualityConstraints {
    pub fn admits(&self, quality: &Quality) -> bool {
        self.max_bitrate.map_or(true, |max| quality.bitrate <= max)
            && quality.fits_within(
                self.max_width.unwrap_or(u32::MAX),
                self.max_height.unwrap_or(u32::MAX),
            )
    }
}

/// Manual selection that overrides ABR
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pin {
    pub quality: Quality,
    /// Switch at the end of the current buffer instead of immediately
    pub adaptive: bool,
}

/// Playable renditions of one session, ordered by bitrate ascending
#[derive(Debug, Clone, Default)]
pub struct QualityCatalog {
    qualities: Vec<Quality>,
    constraints: QualityConstraints,
    pin: Option<Pin>,
}

impl QualityCatalog {
    /// Build the catalog from source renditions, admitting only the
    /// qualities the device can play. Duplicates collapse.
    pub fn new(source: impl IntoIterator<Item = Quality>, device: &dyn DeviceCapabilities) -> Self {
        let mut rejected = 0usize;
        let mut qualities: Vec<Quality> = source
            .into_iter()
            .filter(|q| {
                let ok = device.can_play(q);
                if !ok {
                    rejected += 1;
                }
                ok
            })
            .collect();
        qualities.sort();
        qualities.dedup();

        debug!(admitted = qualities.len(), rejected, "Quality catalog built");

        Self {
            qualities,
            constraints: QualityConstraints::default(),
            pin: None,
        }
    }

    /// All playable qualities, bitrate ascending
    pub fn qualities(&self) -> &[Quality] {
        &self.qualities
    }

    pub fn is_empty(&self) -> bool {
        self.qualities.is_empty()
    }

    pub fn contains(&self, quality: &Quality) -> bool {
        self.qualities.binary_search(quality).is_ok()
    }

    /// The catalog's own copy of a structurally equal quality
    pub fn find(&self, quality: &Quality) -> Option<&Quality> {
        self.qualities
            .binary_search(quality)
            .ok()
            .map(|idx| &self.qualities[idx])
    }

    pub fn index_of(&self, quality: &Quality) -> Option<usize> {
        self.qualities.binary_search(quality).ok()
    }

    /// Replace the advisory ceilings. The full catalog is retained.
    pub fn constrain(&mut self, constraints: QualityConstraints) {
        self.constraints = constraints;
        debug!(?self.constraints, "Quality constraints updated");
    }

    pub fn constraints(&self) -> QualityConstraints {
        self.constraints
    }

    /// Qualities ABR may choose from. Falls back to the lowest quality when
    /// the ceilings exclude everything.
    pub fn candidates(&self) -> Vec<&Quality> {
        let admitted: Vec<&Quality> = self
            .qualities
            .iter()
            .filter(|q| self.constraints.admits(q))
            .collect();
        if admitted.is_empty() {
            self.qualities.first().into_iter().collect()
        } else {
            admitted
        }
    }

    /// Lock selection to one quality, disabling ABR.
    ///
    /// Fails with `InvalidParameter` if the quality is not in the catalog;
    /// the previous pin is left untouched.
    pub fn pin(&mut self, quality: &Quality, adaptive: bool) -> Result<&Quality> {
        let idx = self.index_of(quality).ok_or_else(|| {
            Error::InvalidParameter(format!("quality {quality} is not available"))
        })?;
        let quality = self.qualities[idx].clone();
        info!(quality = %quality, adaptive, "Quality pinned");
        self.pin = Some(Pin { quality, adaptive });
        Ok(&self.qualities[idx])
    }

    /// Drop the pin, re-enabling ABR
    pub fn unpin(&mut self) {
        if self.pin.take().is_some() {
            debug!("Quality pin cleared");
        }
    }

    pub fn pinned(&self) -> Option<&Pin> {
        self.pin.as_ref()
    }

    /// True while ABR may choose the quality
    pub fn is_auto(&self) -> bool {
        self.pin.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MaxHeight(u32);

    impl DeviceCapabilities for MaxHeight {
        fn can_play(&self, quality: &Quality) -> bool {
            quality.height <= self.0
        }
    }

    fn ladder() -> Vec<Quality> {
        vec![
            Quality::new("1080p", "avc1.640028", 6_000_000, 1920, 1080),
            Quality::new("360p", "avc1.4d401e", 800_000, 640, 360),
            Quality::new("720p", "avc1.4d401f", 2_500_000, 1280, 720),
            Quality::new("360p-dup", "avc1.4d401e", 800_000, 640, 360),
        ]
    }

    #[test]
    fn test_catalog_sorted_and_deduplicated() {
        let catalog = QualityCatalog::new(ladder(), &AnyDevice);
        let bitrates: Vec<u64> = catalog.qualities().iter().map(|q| q.bitrate).collect();
        assert_eq!(bitrates, vec![800_000, 2_500_000, 6_000_000]);
    }

    #[test]
    fn test_device_filter() {
        let catalog = QualityCatalog::new(ladder(), &MaxHeight(720));
        assert_eq!(catalog.qualities().len(), 2);
        assert_eq!(catalog.qualities().last().map(|q| q.height), Some(720));
    }

    #[test]
    fn test_constraints_are_advisory() {
        let mut catalog = QualityCatalog::new(ladder(), &AnyDevice);
        catalog.constrain(QualityConstraints {
            max_bitrate: Some(3_000_000),
            ..Default::default()
        });
        let names: Vec<&str> = catalog.candidates().iter().map(|q| q.name.as_str()).collect();
        assert_eq!(names, vec!["360p", "720p"]);
        assert_eq!(catalog.qualities().len(), 3);

        catalog.constrain(QualityConstraints {
            max_bitrate: Some(3_000_000),
            max_width: Some(640),
            max_height: Some(360),
        });
        assert_eq!(catalog.candidates().len(), 1);

        catalog.constrain(QualityConstraints::default());
        assert_eq!(catalog.candidates().len(), 3);
        assert_eq!(catalog.constraints(), QualityConstraints::default());
    }

    #[test]
    fn test_constraints_fall_back_to_lowest() {
        let mut catalog = QualityCatalog::new(ladder(), &AnyDevice);
        catalog.constrain(QualityConstraints {
            max_bitrate: Some(1_000),
            ..Default::default()
        });
        let candidates = catalog.candidates();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].bitrate, 800_000);
    }

    #[test]
    fn test_pin_and_unpin() {
        let mut catalog = QualityCatalog::new(ladder(), &AnyDevice);
        assert!(catalog.is_auto());

        let target = Quality::new("whatever", "avc1.4d401f", 2_500_000, 1280, 720);
        let pinned = catalog.pin(&target, false).unwrap();
        assert_eq!(pinned.name, "720p");
        assert!(!catalog.is_auto());

        catalog.unpin();
        assert!(catalog.is_auto());
    }

    #[test]
    fn test_pin_unknown_quality_keeps_previous() {
        let mut catalog = QualityCatalog::new(ladder(), &AnyDevice);
        let known = catalog.qualities()[0].clone();
        catalog.pin(&known, true).unwrap();

        let unknown = Quality::new("4k", "hvc1", 15_000_000, 3840, 2160);
        let err = catalog.pin(&unknown, false).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
        assert_eq!(catalog.pinned().map(|p| &p.quality), Some(&known));
        assert_eq!(catalog.pinned().map(|p| p.adaptive), Some(true));
    }
}
