/// Build-time override for packaged releases; falls back to the crate version.
const fn version_or_crate_version(opt: Option<&'static str>) -> &'static str {
    match opt {
        Some(val) => val,
        None => env!("CARGO_PKG_VERSION"),
    }
}

pub const VERSION: &str = version_or_crate_version(option_env!("PINGWARDEN_VERSION"));
