//! Resource ledger: stored levels, reservations and docking slots.
//!
//! The ledger is plain bookkeeping. It is owned by the facility state and only
//! ever touched while the monitor lock is held, so it has no locking of its
//! own. Availability predicates are pure; mutation goes through
//! [`Ledger::reserve`], [`Ledger::commit`] and [`Ledger::rollback`], which all
//! take the [`Hold`] describing a grant.

use serde::{Deserialize, Serialize};

use crate::types::{Amounts, Direction};

/// Resources and slot held by one granted request until it is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hold {
    /// Direction of the grant.
    pub direction: Direction,
    /// Reserved amounts.
    pub amounts: Amounts,
    /// Whether the grant occupies a docking slot.
    pub docked: bool,
}

/// Levels, capacities, reservations and slots of one station.
#[derive(Debug, Clone)]
pub struct Ledger {
    capacity: Amounts,
    levels: Amounts,
    total_slots: u32,
    free_slots: u32,
    /// Promised to granted withdrawals.
    reserved_out: Amounts,
    /// Promised to granted deposits.
    reserved_in: Amounts,
}

impl Ledger {
    /// Create a ledger with every slot free and nothing reserved.
    pub fn new(capacity: Amounts, levels: Amounts, total_slots: u32) -> Self {
        Self {
            capacity,
            levels,
            total_slots,
            free_slots: total_slots,
            reserved_out: Amounts::ZERO,
            reserved_in: Amounts::ZERO,
        }
    }

    /// Storage capacity.
    pub fn capacity(&self) -> Amounts {
        self.capacity
    }

    /// Currently stored amounts.
    pub fn levels(&self) -> Amounts {
        self.levels
    }

    /// Number of docking slots.
    pub fn total_slots(&self) -> u32 {
        self.total_slots
    }

    /// Number of unoccupied docking slots.
    pub fn free_slots(&self) -> u32 {
        self.free_slots
    }

    /// Amounts promised to granted withdrawals.
    pub fn reserved_out(&self) -> Amounts {
        self.reserved_out
    }

    /// Amounts promised to granted deposits.
    pub fn reserved_in(&self) -> Amounts {
        self.reserved_in
    }

    /// Stored amounts not yet promised to a withdrawal.
    pub fn available(&self) -> Amounts {
        self.levels.saturating_sub(self.reserved_out)
    }

    /// Free storage not yet promised to a deposit.
    pub fn space(&self) -> Amounts {
        self.capacity
            .saturating_sub(self.levels)
            .saturating_sub(self.reserved_in)
    }

    /// Check whether a slot is free.
    pub fn has_free_slot(&self) -> bool {
        self.free_slots > 0
    }

    /// Check whether the unreserved stock covers `need`, ignoring slots.
    pub fn has_stock(&self, need: Amounts) -> bool {
        need.fits_within(self.available())
    }

    /// Check whether a withdrawal of `need` could be granted right now.
    pub fn can_withdraw(&self, need: Amounts) -> bool {
        self.has_stock(need) && self.has_free_slot()
    }

    /// Check whether the unreserved space takes a deposit of `need`.
    pub fn can_deposit(&self, need: Amounts) -> bool {
        need.fits_within(self.space())
    }

    /// Check whether a grant of `hold` could be made right now.
    pub fn can_hold(&self, hold: &Hold) -> bool {
        self.resources_for(hold) && (!hold.docked || self.has_free_slot())
    }

    /// Check whether the resource side of `hold` can be met, ignoring slots.
    pub fn resources_for(&self, hold: &Hold) -> bool {
        match hold.direction {
            Direction::Consume => self.has_stock(hold.amounts),
            Direction::Supply => self.can_deposit(hold.amounts),
        }
    }

    /// Reserve resources (and a slot) for a grant.
    ///
    /// The caller must have checked [`Ledger::can_hold`].
    pub fn reserve(&mut self, hold: &Hold) {
        debug_assert!(self.can_hold(hold));
        match hold.direction {
            Direction::Consume => {
                self.reserved_out = self.reserved_out.saturating_add(hold.amounts);
            }
            Direction::Supply => {
                self.reserved_in = self.reserved_in.saturating_add(hold.amounts);
            }
        }
        if hold.docked {
            self.free_slots -= 1;
        }
    }

    /// Turn a reservation into a level change and free its slot.
    pub fn commit(&mut self, hold: &Hold) {
        match hold.direction {
            Direction::Consume => {
                self.levels = self.levels.saturating_sub(hold.amounts);
                self.reserved_out = self.reserved_out.saturating_sub(hold.amounts);
            }
            Direction::Supply => {
                self.levels = self.levels.saturating_add(hold.amounts);
                self.reserved_in = self.reserved_in.saturating_sub(hold.amounts);
            }
        }
        self.release_slot(hold);
    }

    /// Drop a reservation without touching levels and free its slot.
    pub fn rollback(&mut self, hold: &Hold) {
        match hold.direction {
            Direction::Consume => {
                self.reserved_out = self.reserved_out.saturating_sub(hold.amounts);
            }
            Direction::Supply => {
                self.reserved_in = self.reserved_in.saturating_sub(hold.amounts);
            }
        }
        self.release_slot(hold);
    }

    fn release_slot(&mut self, hold: &Hold) {
        if hold.docked {
            debug_assert!(self.free_slots < self.total_slots);
            self.free_slots = (self.free_slots + 1).min(self.total_slots);
        }
    }

    /// Copy the ledger into a serializable view.
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            capacity: self.capacity,
            levels: self.levels,
            total_slots: self.total_slots,
            free_slots: self.free_slots,
            reserved_out: self.reserved_out,
            reserved_in: self.reserved_in,
        }
    }
}

/// Point-in-time copy of a [`Ledger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    /// Storage capacity.
    pub capacity: Amounts,
    /// Stored amounts.
    pub levels: Amounts,
    /// Number of docking slots.
    pub total_slots: u32,
    /// Unoccupied docking slots.
    pub free_slots: u32,
    /// Amounts promised to granted withdrawals.
    pub reserved_out: Amounts,
    /// Amounts promised to granted deposits.
    pub reserved_in: Amounts,
}

impl LedgerSnapshot {
    /// Check every ledger invariant.
    ///
    /// Levels within capacity, free slots within total, withdrawals never
    /// promised beyond stock, deposits never promised beyond headroom.
    pub fn is_consistent(&self) -> bool {
        self.levels.fits_within(self.capacity)
            && self.free_slots <= self.total_slots
            && self.reserved_out.fits_within(self.levels)
            && self
                .levels
                .saturating_add(self.reserved_in)
                .fits_within(self.capacity)
    }

    /// Number of occupied docking slots.
    pub fn occupied_slots(&self) -> u32 {
        self.total_slots - self.free_slots
    }
}
