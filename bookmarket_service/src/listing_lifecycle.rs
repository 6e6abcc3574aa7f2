//! Listing lifecycle: Available -> Reserved -> Sold, plus the ownership rules
//! that decide who may act on a listing in which state.
//!
//! Both repositories load the listing row, call [`authorize`] and then write
//! [`next_status`], so the rules live in one place.

use std::fmt;

use crate::api::{ListingId, ListingStatus, UserId};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ListingAction {
    Favorite,
    Reserve,
    Buy,
    BuyReserved,
    CancelReservation,
    Edit,
    Delete,
}

impl fmt::Display for ListingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            ListingAction::Favorite => "favorite",
            ListingAction::Reserve => "reserve",
            ListingAction::Buy => "buy",
            ListingAction::BuyReserved => "buy reserved",
            ListingAction::CancelReservation => "cancel reservation of",
            ListingAction::Edit => "edit",
            ListingAction::Delete => "delete",
        };
        f.write_str(verb)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
/// The part of a listing row the lifecycle rules look at
pub struct ListingState {
    pub listing_id: ListingId,
    pub owner_id: UserId,
    pub status: ListingStatus,
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum LifecycleViolation {
    #[error("User is not the owner of listing {0}")]
    NotOwner(ListingId),

    #[error("Cannot {action} own listing {listing_id}")]
    OwnListing {
        listing_id: ListingId,
        action: ListingAction,
    },

    #[error("Listing {0} is sold")]
    Sold(ListingId),

    #[error("Listing {listing_id} is {status}, not available")]
    NotAvailable {
        listing_id: ListingId,
        status: ListingStatus,
    },

    #[error("Listing {listing_id} cannot be deleted while {status}")]
    Locked {
        listing_id: ListingId,
        status: ListingStatus,
    },

    #[error("Listing {0} is not reserved")]
    NotReserved(ListingId),
}

/// Checks whether `actor` may perform `action` on `listing`.
///
/// Reservation ownership for [`ListingAction::BuyReserved`] and
/// [`ListingAction::CancelReservation`] is checked by the caller, since it
/// depends on the reservation row rather than on the listing.
pub fn authorize(
    action: ListingAction,
    actor: UserId,
    listing: &ListingState,
) -> Result<(), LifecycleViolation> {
    let is_owner = listing.owner_id == actor;
    let own_listing = || LifecycleViolation::OwnListing {
        listing_id: listing.listing_id,
        action,
    };
    let not_available = || LifecycleViolation::NotAvailable {
        listing_id: listing.listing_id,
        status: listing.status,
    };

    match action {
        ListingAction::Favorite => {
            if listing.status == ListingStatus::Sold {
                return Err(LifecycleViolation::Sold(listing.listing_id));
            }
            if is_owner {
                return Err(own_listing());
            }
        }
        ListingAction::Reserve => {
            if listing.status != ListingStatus::Available {
                return Err(not_available());
            }
            if is_owner {
                return Err(own_listing());
            }
        }
        ListingAction::Buy => {
            if is_owner {
                return Err(own_listing());
            }
            if listing.status != ListingStatus::Available {
                return Err(not_available());
            }
        }
        ListingAction::BuyReserved => {
            if listing.status != ListingStatus::Reserved {
                return Err(LifecycleViolation::NotReserved(listing.listing_id));
            }
        }
        ListingAction::CancelReservation => {}
        ListingAction::Edit => {
            if !is_owner {
                return Err(LifecycleViolation::NotOwner(listing.listing_id));
            }
        }
        ListingAction::Delete => {
            if !is_owner {
                return Err(LifecycleViolation::NotOwner(listing.listing_id));
            }
            if listing.status != ListingStatus::Available {
                return Err(LifecycleViolation::Locked {
                    listing_id: listing.listing_id,
                    status: listing.status,
                });
            }
        }
    }
    Ok(())
}

/// Status of the listing once `action` has been applied to a listing in `current`.
pub fn next_status(action: ListingAction, current: ListingStatus) -> ListingStatus {
    match action {
        ListingAction::Reserve => ListingStatus::Reserved,
        ListingAction::Buy | ListingAction::BuyReserved => ListingStatus::Sold,
        // a sold listing stays sold even if a stale reservation is dropped
        ListingAction::CancelReservation if current == ListingStatus::Reserved => {
            ListingStatus::Available
        }
        _ => current,
    }
}
