use pfs_ccd_drivers::configuration;

pub fn configuration(trailer: configuration::Trailer) -> pfs_ccd_drivers::Configuration {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mut configuration = pfs_ccd_drivers::Configuration::default();
    configuration.trailer = trailer;
    configuration.polling.interval = std::time::Duration::from_micros(1);
    configuration.polling.maximum_polls = 50;
    configuration.reset_settle = std::time::Duration::ZERO;
    configuration.arm_settle = std::time::Duration::ZERO;
    configuration
}

pub fn session(
    amplifiers: u32,
    trailer: configuration::Trailer,
) -> (
    pfs_ccd_drivers::Emulator,
    pfs_ccd_drivers::Session<pfs_ccd_drivers::Emulator>,
) {
    let emulator = pfs_ccd_drivers::Emulator::new(amplifiers, trailer);
    let session =
        pfs_ccd_drivers::Session::configure(emulator.clone(), configuration(trailer))
            .expect("the emulator answers the identity register");
    (emulator, session)
}
