fn main() {
    // macOS only grants CoreBluetooth access to binaries that carry an
    // Info.plist with NSBluetoothAlwaysUsageDescription. A plain CLI has no
    // app bundle, so the plist goes into the __TEXT,__info_plist section.
    //
    // CARGO_CFG_TARGET_OS is the target, so cross builds pick this up too.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("macos") {
        return;
    }
    let Ok(dir) = std::env::var("CARGO_MANIFEST_DIR") else {
        return;
    };

    // ld … -sectcreate __TEXT __info_plist <dir>/Info.plist
    for arg in ["-sectcreate", "__TEXT", "__info_plist"] {
        println!("cargo:rustc-link-arg={arg}");
    }
    println!("cargo:rustc-link-arg={dir}/Info.plist");
    println!("cargo:rerun-if-changed=Info.plist");
}
