//! Link the olm engine archive when the `olm-ffi` feature is enabled.
//!
//! The archive is produced by `go build -buildmode=c-archive` and is expected
//! as `libolm.a` inside `OLM_LIB_DIR`.

fn main() {
    println!("cargo:rerun-if-env-changed=OLM_LIB_DIR");

    if std::env::var_os("CARGO_FEATURE_OLM_FFI").is_none() {
        return;
    }

    match std::env::var("OLM_LIB_DIR") {
        Ok(dir) => {
            println!("cargo:rustc-link-search=native={}", dir);
            println!("cargo:rustc-link-lib=static=olm");
            // The Go runtime inside the archive needs pthread
            println!("cargo:rustc-link-lib=dylib=pthread");
        }
        Err(_) => {
            println!("cargo:warning=olm-ffi enabled but OLM_LIB_DIR is not set; linking will fail");
        }
    }
}
