fn main() {
    // esp-idf link args are only relevant when building for the device.
    if std::env::var_os("CARGO_FEATURE_ESP32").is_some() {
        embuild::espidf::sysenv::output();
    }
}
