fn main() {
    // Only the ESP-IDF target needs the SDK environment; host builds run the unit tests.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
    }
}
