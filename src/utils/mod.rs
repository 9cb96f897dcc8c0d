//! Internal helpers for timestamps, atomic JSON persistence and keyed locking.

pub(crate) mod date;
pub(crate) mod keyed_lock;
pub(crate) mod persist;
