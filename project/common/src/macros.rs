/// Log the error of a `Result` and carry on.
#[macro_export]
macro_rules! log_error {
    ($maybe_error:expr) => {
        if let Err(e) = $maybe_error {
            $crate::_private::error!("{e}");
        }
    };
    ($maybe_error:expr, $context:expr) => {
        if let Err(e) = $maybe_error {
            $crate::_private::error!("{}: {e:#}", $context);
        }
    };
}
