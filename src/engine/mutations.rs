use std::time::Instant;

use tracing::{info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::store::{BookingLedger, SlotStore, TransactionalStore};

use super::error::in_scope;
use super::validate::validate_booking;
use super::{ADVANCE_BOOKING, CANCEL_BOOKING, CREATE_BOOKING, Engine, EngineError};

const SLOT_ALREADY_OCCUPIED: &str = "slot_already_occupied";
const SLOT_NOT_OCCUPIED: &str = "slot_not_occupied";

impl<S: TransactionalStore> Engine<S> {
    /// Insert an `upcoming` booking and flip its slot `available → occupied`
    /// in one scope.
    pub async fn create_booking(&self, request: BookingRequest) -> Result<BookingId, EngineError> {
        let started = Instant::now();
        let result = self.try_create_booking(request).await;
        self.finish(CREATE_BOOKING, started, result).await
    }

    async fn try_create_booking(&self, request: BookingRequest) -> Result<BookingId, EngineError> {
        let request = validate_booking(request)?;
        let slot = self
            .store
            .slot(&request.slot_id)
            .ok_or(EngineError::slot_not_found(request.slot_id))?;
        if slot.status == SlotStatus::Occupied {
            return Err(EngineError::Conflict {
                operation: CREATE_BOOKING,
                reason: SLOT_ALREADY_OCCUPIED,
            });
        }

        let booking = Booking {
            id: Ulid::new(),
            slot_id: slot.id,
            vehicle_number: request.vehicle_number,
            window: request.window,
            total_cost: request.total_cost,
            status: BookingStatus::Upcoming,
            created_at: now_ms(),
        };
        let err = in_scope(CREATE_BOOKING);
        self.with_transaction(CREATE_BOOKING, &[slot.id], move |tx| {
            let id = tx.insert_booking(booking).map_err(&err)?;
            // The committed read above may be stale; the row lock makes this one authoritative.
            let claimed = tx
                .compare_and_set_status(&slot.id, SlotStatus::Available, SlotStatus::Occupied)
                .map_err(&err)?;
            if !claimed {
                return Err(EngineError::Conflict {
                    operation: CREATE_BOOKING,
                    reason: SLOT_ALREADY_OCCUPIED,
                });
            }
            Ok(id)
        })
        .await
    }

    /// Cancel an `upcoming` booking and release its slot.
    ///
    /// Cancelling an already cancelled booking succeeds without touching
    /// anything. `active` and `completed` bookings cannot be cancelled.
    pub async fn cancel_booking(&self, id: BookingId) -> Result<CancelOutcome, EngineError> {
        let started = Instant::now();
        let result = self.try_cancel_booking(id).await;
        self.finish(CANCEL_BOOKING, started, result).await
    }

    async fn try_cancel_booking(&self, id: BookingId) -> Result<CancelOutcome, EngineError> {
        let booking = self
            .store
            .booking(&id)
            .ok_or(EngineError::booking_not_found(id))?;
        match booking.status {
            BookingStatus::Cancelled => return Ok(CancelOutcome::AlreadyCancelled),
            BookingStatus::Active | BookingStatus::Completed => {
                return Err(EngineError::InvalidState {
                    operation: CANCEL_BOOKING,
                    booking: id,
                    status: booking.status,
                });
            }
            BookingStatus::Upcoming => {}
        }

        let err = in_scope(CANCEL_BOOKING);
        self.with_transaction(CANCEL_BOOKING, &[booking.slot_id], move |tx| {
            // Re-read under the row lock: a concurrent cancel may have won.
            let current = tx.get_booking(&id).map_err(&err)?;
            if current.status == BookingStatus::Cancelled {
                return Ok(CancelOutcome::AlreadyCancelled);
            }
            tx.update_booking_status(&id, BookingStatus::Cancelled)
                .map_err(&err)?;
            let released = tx
                .compare_and_set_status(
                    &current.slot_id,
                    SlotStatus::Occupied,
                    SlotStatus::Available,
                )
                .map_err(&err)?;
            if !released {
                return Err(EngineError::Conflict {
                    operation: CANCEL_BOOKING,
                    reason: SLOT_NOT_OCCUPIED,
                });
            }
            Ok(CancelOutcome::Cancelled)
        })
        .await
    }

    /// Move a booking along `upcoming → active → completed` as far as `now`
    /// allows, releasing its slot on completion. Returns the new status, or
    /// `None` if nothing was due.
    pub async fn advance_booking(
        &self,
        id: BookingId,
        now: Ms,
    ) -> Result<Option<BookingStatus>, EngineError> {
        let started = Instant::now();
        let result = self.try_advance_booking(id, now).await;
        self.finish(ADVANCE_BOOKING, started, result).await
    }

    async fn try_advance_booking(
        &self,
        id: BookingId,
        now: Ms,
    ) -> Result<Option<BookingStatus>, EngineError> {
        let booking = self
            .store
            .booking(&id)
            .ok_or(EngineError::booking_not_found(id))?;

        let err = in_scope(ADVANCE_BOOKING);
        self.with_transaction(ADVANCE_BOOKING, &[booking.slot_id], move |tx| {
            let current = tx.get_booking(&id).map_err(&err)?;
            let mut status = current.status;
            if status == BookingStatus::Upcoming && current.window.start <= now {
                tx.update_booking_status(&id, BookingStatus::Active)
                    .map_err(&err)?;
                status = BookingStatus::Active;
            }
            if status == BookingStatus::Active && current.window.end <= now {
                tx.update_booking_status(&id, BookingStatus::Completed)
                    .map_err(&err)?;
                let released = tx
                    .compare_and_set_status(
                        &current.slot_id,
                        SlotStatus::Occupied,
                        SlotStatus::Available,
                    )
                    .map_err(&err)?;
                if !released {
                    return Err(EngineError::Conflict {
                        operation: ADVANCE_BOOKING,
                        reason: SLOT_NOT_OCCUPIED,
                    });
                }
                status = BookingStatus::Completed;
            }
            Ok((status != current.status).then_some(status))
        })
        .await
    }

    /// Advance every booking whose start or end has passed. Failures are
    /// logged per booking and do not stop the sweep.
    pub async fn advance_due(&self, now: Ms) -> Vec<(BookingId, BookingStatus)> {
        let due: Vec<BookingId> = self
            .store
            .bookings()
            .into_iter()
            .filter(|b| match b.status {
                BookingStatus::Upcoming => b.window.start <= now,
                BookingStatus::Active => b.window.end <= now,
                BookingStatus::Completed | BookingStatus::Cancelled => false,
            })
            .map(|b| b.id)
            .collect();

        let mut advanced = Vec::new();
        for id in due {
            match self.advance_booking(id, now).await {
                Ok(Some(status)) => {
                    info!("booking {id} is now {status}");
                    advanced.push((id, status));
                }
                Ok(None) => {}
                Err(e) => warn!("advance skip {id}: {e}"),
            }
        }
        advanced
    }
}
