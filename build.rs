//! Ensures the crate is recompiled when migration files change, which the
//! `SQLx` `migrate!()` macro needs to pick up new migrations at build time.

/// Main build script entry point.
///
/// Tells Cargo to rerun the build when files in the migrations directory change,
/// which is required for the `SQLx` migration system to work properly.
fn main() {
    println!("cargo:rerun-if-changed=migrations");
}
