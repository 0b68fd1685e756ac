//! crate error types

use std::time::Duration;

use snafu::prelude::*;

/// Connection manager error type
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum Error {
    /// Asked for connection data while not connected
    #[snafu(display("not connected, current state is {state}"))]
    NotConnected {
        /// state when asked
        state: String,
    },

    /// Connection not established in time
    #[snafu(display("connection not established in {timeout:?}"))]
    ConnectionTimeout {
        /// waited time
        timeout: Duration,
    },

    /// Internal reactor stopped
    #[snafu(display("connection manager is closed"))]
    ManagerClosed,
}
