//! Listing validation.
//!
//! Upstream pages are checked before they are cached or returned. A failed
//! check is an [`ListingError::UpstreamDataError`].

use crate::{ListingError, ListingResult, Result};
use std::collections::HashSet;

/// Trait for validating listing values.
pub trait CheckValue<T> {
    /// Validate the given value.
    ///
    /// Returns `Ok(())` if the value is valid, or `Err(ListingError)` if invalid.
    fn check(&self, value: &T) -> Result<()>;
}

/// Ranks must be strictly increasing, which also makes them unique.
pub struct RankOrder;

impl CheckValue<ListingResult> for RankOrder {
    fn check(&self, value: &ListingResult) -> Result<()> {
        for pair in value.photos.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if next.rank == prev.rank {
                return Err(ListingError::data(format!(
                    "rank {} appears more than once (photos {} and {})",
                    next.rank, prev.id, next.id
                )));
            }
            if next.rank < prev.rank {
                return Err(ListingError::data(format!(
                    "rank {} follows rank {} (photo {})",
                    next.rank, prev.rank, next.id
                )));
            }
        }
        Ok(())
    }
}

/// A photo may appear only once per page.
pub struct DistinctPhotos;

impl CheckValue<ListingResult> for DistinctPhotos {
    fn check(&self, value: &ListingResult) -> Result<()> {
        let mut seen = HashSet::with_capacity(value.photos.len());
        for photo in &value.photos {
            if !seen.insert(photo.id.as_str()) {
                return Err(ListingError::data(format!(
                    "photo {} listed more than once on page {}",
                    photo.id, value.page
                )));
            }
        }
        Ok(())
    }
}

/// A page never holds more photos than its page size.
pub struct PageBound;

impl CheckValue<ListingResult> for PageBound {
    fn check(&self, value: &ListingResult) -> Result<()> {
        if value.photos.len() > value.per_page as usize {
            return Err(ListingError::data(format!(
                "page holds {} photos but page size is {}",
                value.photos.len(),
                value.per_page
            )));
        }
        Ok(())
    }
}

/// Run every listing check.
pub fn validate_listing(value: &ListingResult) -> Result<()> {
    let checks: [&dyn CheckValue<ListingResult>; 3] = [&PageBound, &RankOrder, &DistinctPhotos];
    checks.iter().try_for_each(|check| check.check(value))
}
