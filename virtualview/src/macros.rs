// Logging shims: forward to `tracing` (target "virtualview") when the feature is on, otherwise
// expand to nothing so `no_std` builds carry no logging code at all.

#[cfg(feature = "tracing")]
macro_rules! vtrace {
    ($($tt:tt)*) => {
        tracing::trace!(target: "virtualview", $($tt)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! vtrace {
    ($($tt:tt)*) => {{}};
}

#[cfg(feature = "tracing")]
macro_rules! vdebug {
    ($($tt:tt)*) => {
        tracing::debug!(target: "virtualview", $($tt)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! vdebug {
    ($($tt:tt)*) => {{}};
}

#[cfg(feature = "tracing")]
macro_rules! vinfo {
    ($($tt:tt)*) => {
        tracing::info!(target: "virtualview", $($tt)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! vinfo {
    ($($tt:tt)*) => {{}};
}

#[cfg(feature = "tracing")]
macro_rules! vwarn {
    ($($tt:tt)*) => {
        tracing::warn!(target: "virtualview", $($tt)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! vwarn {
    ($($tt:tt)*) => {{}};
}
