#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- setup errors ----------------------------------------------
    #[error("inspector endpoint is not available")]
    InspectorUnavailable,
    #[error("inspector endpoint is already in use")]
    InspectorBusy,

    // --------------------------------- protocol errors -------------------------------------------
    #[error("transport: {0}")]
    Transport(anyhow::Error),
    #[error("malformed protocol payload: {0}")]
    Protocol(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[macro_export]
macro_rules! _error {
    ($log_fn: path, $res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "localvars", "{:#}", e);
                None
            }
        }
    };
    ($log_fn: path, $res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "localvars", concat!($msg, " {:#}"), e);
                None
            }
        }
    };
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        $crate::_error!(log::warn, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::warn, $res, $msg)
    };
}

/// Transforms `Result` into `Option` and put error into debug logs if it occurs.
#[macro_export]
macro_rules! muted_error {
    ($res: expr) => {
        $crate::_error!(log::debug, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::debug, $res, $msg)
    };
}
