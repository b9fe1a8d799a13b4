use serde::Serialize;

use crate::models::Listing;
use crate::range::DateRange;
use crate::{CoreError, CoreResult};

/// Price of a stay, computed before the reservation is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Quote {
    pub nights: i32,
    pub price_per_night: i64,
    pub total: i64,
}

/// Flat-rate pricing: every night costs `listing.price`.
///
/// `weekend_price` is intentionally not applied; the listing page shows it,
/// but stays have always been charged at the nightly rate.
pub fn quote(listing: &Listing, range: &DateRange) -> CoreResult<Quote> {
    let nights = range.nights();
    if nights < 1 {
        return Err(CoreError::InvalidRange(format!("{} nights", nights)));
    }
    let nights = i32::try_from(nights)
        .map_err(|_| CoreError::InvalidRange(format!("stay of {} nights is too long", nights)))?;

    let total = listing
        .price
        .checked_mul(i64::from(nights))
        .ok_or_else(|| CoreError::InvalidRange("total price overflows".to_string()))?;

    Ok(Quote {
        nights,
        price_per_night: listing.price,
        total,
    })
}
