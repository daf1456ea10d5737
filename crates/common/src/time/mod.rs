//! Time abstractions
//!
//! Token expiry and CSRF-state lifetimes are computed against a [`Clock`]
//! so that tests can move time forward deterministically with
//! [`MockClock`] instead of sleeping.
//!
//! ```
//! use chrono::Duration;
//!
//! use credbroker_common::time::{Clock, MockClock};
//!
//! let clock = MockClock::new();
//! let start = clock.now();
//! clock.advance(Duration::minutes(5));
//! assert_eq!(clock.now() - start, Duration::minutes(5));
//! ```

pub mod clock;

pub use clock::{Clock, MockClock, SystemClock};
