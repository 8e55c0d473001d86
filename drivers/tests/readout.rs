mod common;

use pfs_ccd_drivers::configuration::{LineTolerance, Trailer};
use pfs_ccd_drivers::emulator::pattern;
use pfs_ccd_drivers::registers::{AdcGeneration, Id};
use pfs_ccd_drivers::{AdcMode, Error, RowStatus, State};
use rstest::rstest;

fn assert_pattern(image: &[u16], rows: u32, row_pixels: usize, test: bool) {
    assert_eq!(image.len(), rows as usize * row_pixels);
    for (row, pixels) in image.chunks(row_pixels).enumerate() {
        for (index, pixel) in pixels.iter().enumerate() {
            assert_eq!(
                *pixel,
                pattern(row as u32, index as u32, test),
                "row {row}, pixel {index}"
            );
        }
    }
}

#[test]
fn configure_reads_the_identity() {
    let (_, mut session) = common::session(8, Trailer::Crc);
    assert_eq!(session.state(), State::Idle);
    let id = session.fpga_version().unwrap();
    assert_eq!(id.fpga_version(), 0x84);
    assert_eq!(id.adc_generation(), Some(AdcGeneration::New));
    assert_eq!(session.adc_generation(), Some(AdcGeneration::New));
}

#[test]
fn configure_fails_without_identity() {
    let emulator = pfs_ccd_drivers::Emulator::new(8, Trailer::Crc);
    emulator.refuse(Id::ADDRESS);
    let result = pfs_ccd_drivers::Session::configure(
        emulator.clone(),
        common::configuration(Trailer::Crc),
    );
    assert!(result.is_err());
    assert!(emulator.control_writes().is_empty());
}

#[test]
fn clean_image() {
    let (emulator, mut session) = common::session(8, Trailer::Crc);
    let (rows, columns, amplifiers) = (5, 3, 8);
    session
        .configure_for_readout(rows, columns, true, AdcMode::Msb)
        .unwrap();
    assert_eq!(session.state(), State::Armed);
    let control = emulator.control();
    assert_eq!((control.en_synch, control.wpu_test, control.adc_mode), (1, 1, 3));

    let mut image = vec![0u16; (rows * columns * amplifiers) as usize];
    let mut seen = Vec::new();
    let bad_rows = session
        .read_image_with(rows, columns, amplifiers, &mut image, |row, status| {
            seen.push((row, status))
        })
        .unwrap();
    assert_eq!(bad_rows, 0);
    assert_eq!(seen.len(), rows as usize);
    assert!(seen.iter().all(|(_, status)| status.is_ok()));
    assert_pattern(&image, rows, (columns * amplifiers) as usize, true);
    assert_eq!(session.state(), State::Idle);
    assert_eq!(emulator.control_writes().last(), Some(&0));
    // one pulse at reset, one before the first row
    assert_eq!(emulator.fifo_resets(), 2);
}

#[rstest]
#[case(0)]
#[case(3)]
#[case(6)]
fn corrupted_checksum_is_counted_not_fatal(#[case] bad_row: u32) {
    let (emulator, mut session) = common::session(8, Trailer::Crc);
    let (rows, columns, amplifiers) = (7, 4, 8);
    emulator.corrupt_crc(bad_row);
    session
        .configure_for_readout(rows, columns, false, AdcMode::Msb)
        .unwrap();
    let mut image = vec![0u16; (rows * columns * amplifiers) as usize];
    let mut statuses = Vec::new();
    let bad_rows = session
        .read_image_with(rows, columns, amplifiers, &mut image, |_, status| {
            statuses.push(status)
        })
        .unwrap();
    assert_eq!(bad_rows, 1);
    assert!(matches!(
        statuses[bad_row as usize],
        RowStatus::CrcMismatch { expected, read } if expected ^ read == 1
    ));
    assert_pattern(&image, rows, (columns * amplifiers) as usize, false);
    assert_eq!(session.state(), State::Idle);
}

#[test]
fn row_index_echo_is_checked() {
    let (emulator, mut session) = common::session(8, Trailer::CrcAndRow);
    emulator.misnumber_row(2);
    session
        .configure_for_readout(4, 2, true, AdcMode::Msb)
        .unwrap();
    let mut image = vec![0u16; 4 * 2 * 8];
    let mut statuses = Vec::new();
    let bad_rows = session
        .read_image_with(4, 2, 8, &mut image, |_, status| statuses.push(status))
        .unwrap();
    assert_eq!(bad_rows, 1);
    assert_eq!(
        statuses[2],
        RowStatus::RowMismatch {
            expected: 0xaaaa_0002,
            read: 0xaaaa_0003
        }
    );
    assert_pattern(&image, 4, 16, true);
}

#[test]
fn odd_pixel_count_reads_whole_words() {
    let (emulator, mut session) = common::session(1, Trailer::Crc);
    session
        .configure_for_readout(2, 3, true, AdcMode::Msb)
        .unwrap();
    let mut words = [0u32; 2];
    assert_eq!(session.read_raw_line(&mut words, 0).unwrap(), RowStatus::Ok);
    assert_eq!(words[1] >> 16, 0);
    let mut pixels = [0u16; 3];
    assert_eq!(session.read_line(&mut pixels, 1).unwrap(), RowStatus::Ok);
    assert_eq!(pixels, [pattern(1, 0, true), pattern(1, 1, true), pattern(1, 2, true)]);
    assert_eq!(session.state(), State::Armed);
    assert_eq!(emulator.rows_produced(), 2);
}

#[rstest]
#[case::lsb(AdcMode::Lsb, 0b11)]
#[case::mid(AdcMode::Mid, 0b10)]
fn old_converters_use_their_own_encoding(#[case] mode: AdcMode, #[case] bits: u32) {
    let emulator = pfs_ccd_drivers::Emulator::new(8, Trailer::Crc);
    emulator.set_id(0x0000_0070);
    let mut session =
        pfs_ccd_drivers::Session::configure(emulator.clone(), common::configuration(Trailer::Crc))
            .unwrap();
    assert_eq!(session.adc_generation(), Some(AdcGeneration::Old));
    session.configure_for_readout(1, 1, false, mode).unwrap();
    assert_eq!(emulator.control().adc_mode, bits);
}

#[test]
fn old_converters_refuse_the_msb_mode() {
    let emulator = pfs_ccd_drivers::Emulator::new(8, Trailer::Crc);
    emulator.set_id(0x0000_0070);
    let mut session =
        pfs_ccd_drivers::Session::configure(emulator.clone(), common::configuration(Trailer::Crc))
            .unwrap();
    assert!(matches!(
        session.configure_for_readout(1, 1, false, AdcMode::Msb),
        Err(Error::AdcMode {
            mode: AdcMode::Msb,
            generation: Some(AdcGeneration::Old),
        })
    ));
    assert_eq!(session.state(), State::Idle);
    assert_eq!(emulator.control().en_synch, 0);
    session.set_adc_generation(AdcGeneration::New);
    session.arm_readout(1, false, AdcMode::Msb).unwrap();
    assert_eq!(emulator.control().adc_mode, 0b11);
}

#[rstest]
#[case::lsb(AdcMode::Lsb, 0b01)]
#[case::mid(AdcMode::Mid, 0b10)]
#[case::msb(AdcMode::Msb, 0b11)]
fn new_converters_take_every_mode(#[case] mode: AdcMode, #[case] bits: u32) {
    let (emulator, mut session) = common::session(8, Trailer::Crc);
    session.configure_for_readout(1, 1, false, mode).unwrap();
    assert_eq!(emulator.control().adc_mode, bits);
}

#[test]
fn unknown_generation_refuses_to_arm() {
    let emulator = pfs_ccd_drivers::Emulator::new(8, Trailer::Crc);
    emulator.set_id(0x0000_0010);
    let mut session =
        pfs_ccd_drivers::Session::configure(emulator.clone(), common::configuration(Trailer::Crc))
            .unwrap();
    assert_eq!(session.adc_generation(), None);
    assert!(matches!(
        session.configure_for_readout(1, 1, false, AdcMode::Mid),
        Err(Error::AdcMode {
            generation: None,
            ..
        })
    ));
    assert_eq!(session.state(), State::Idle);
}

#[test]
fn arm_requires_idle() {
    let (_, mut session) = common::session(8, Trailer::Crc);
    assert!(matches!(
        session.arm_readout(1, false, AdcMode::Msb),
        Err(Error::EmptyProgram)
    ));
    assert_eq!(session.state(), State::Idle);
    session
        .configure_for_readout(1, 1, false, AdcMode::Msb)
        .unwrap();
    match session.arm_readout(1, false, AdcMode::Msb) {
        Err(Error::State { actual, .. }) => assert_eq!(actual, State::Armed),
        other => panic!("unexpected result {other:?}"),
    }
    assert_eq!(session.state(), State::Armed);
}

#[test]
fn read_line_requires_armed() {
    let (_, mut session) = common::session(8, Trailer::Crc);
    let mut pixels = [0u16; 8];
    assert!(matches!(
        session.read_line(&mut pixels, 0),
        Err(Error::State {
            actual: State::Idle,
            ..
        })
    ));
    assert_eq!(session.state(), State::Idle);
}

#[test]
fn reset_refuses_unless_forced() {
    let (emulator, mut session) = common::session(8, Trailer::Crc);
    session
        .configure_for_readout(2, 2, false, AdcMode::Msb)
        .unwrap();
    assert!(session.reset_readout(false).is_err());
    assert_eq!(session.state(), State::Armed);
    session.reset_readout(true).unwrap();
    assert_eq!(session.state(), State::Idle);
    assert_eq!(emulator.control().wpu_rst, 1);
    assert!(session.program().is_empty());
}

#[rstest]
#[case::idle(false, false)]
#[case::armed(true, false)]
#[case::failed(false, true)]
fn finish_always_idles(#[case] arm: bool, #[case] fail: bool) {
    let (emulator, mut session) = common::session(8, Trailer::Crc);
    if arm {
        session
            .configure_for_readout(1, 1, false, AdcMode::Msb)
            .unwrap();
        assert_eq!(session.state(), State::Armed);
    }
    if fail {
        session.reset_readout(false).unwrap();
        assert!(session.build_row_program(0, 5000).is_err());
        assert_eq!(session.state(), State::Failed);
    }
    session.finish_readout().unwrap();
    assert_eq!(session.state(), State::Idle);
    assert_eq!(emulator.control_writes().last(), Some(&0));
}

#[test]
fn wrong_buffer_size_is_refused() {
    let (_, mut session) = common::session(8, Trailer::Crc);
    session
        .configure_for_readout(2, 2, false, AdcMode::Msb)
        .unwrap();
    let mut image = vec![0u16; 31];
    assert!(matches!(
        session.read_image(2, 2, 8, &mut image),
        Err(Error::BufferSize {
            expected: 32,
            actual: 31
        })
    ));
    assert!(matches!(
        session.read_image(0, 2, 8, &mut image),
        Err(Error::EmptyGeometry)
    ));
    assert_eq!(session.state(), State::Armed);
}

#[test]
fn release_stops_the_clocks() {
    let (emulator, mut session) = common::session(8, Trailer::Crc);
    session
        .configure_for_readout(2, 2, false, AdcMode::Msb)
        .unwrap();
    session.release().unwrap();
    assert_eq!(emulator.control_writes().last(), Some(&0));
    assert_eq!(emulator.control().en_synch, 0);
}

#[test]
fn dropping_an_armed_session_stops_the_clocks() {
    let (emulator, mut session) = common::session(8, Trailer::Crc);
    session
        .configure_for_readout(2, 2, false, AdcMode::Msb)
        .unwrap();
    assert_eq!(emulator.control().en_synch, 1);
    drop(session);
    assert_eq!(emulator.control().en_synch, 0);
}

#[test]
fn stall_interrupts_the_image() {
    let (emulator, mut session) = common::session(8, Trailer::Crc);
    emulator.hang_from(2);
    session
        .configure_for_readout(4, 2, false, AdcMode::Msb)
        .unwrap();
    let mut image = vec![0u16; 4 * 2 * 8];
    match session.read_image(4, 2, 8, &mut image) {
        Err(Error::Stalled { polls, .. }) => assert_eq!(polls, 50),
        other => panic!("unexpected result {other:?}"),
    }
    assert_eq!(session.state(), State::Idle);
    assert_eq!(emulator.control_writes().last(), Some(&0));
    assert_pattern(&image[..2 * 16], 2, 16, false);
}

#[rstest]
#[case(LineTolerance::Armed)]
#[case(LineTolerance::ArmedOrReading)]
fn line_tolerance_after_a_stall(#[case] tolerance: LineTolerance) {
    let emulator = pfs_ccd_drivers::Emulator::new(8, Trailer::Crc);
    emulator.hang_from(0);
    let mut configuration = common::configuration(Trailer::Crc);
    configuration.line_tolerance = tolerance;
    configuration.polling.maximum_polls = 3;
    let mut session =
        pfs_ccd_drivers::Session::configure(emulator, configuration).unwrap();
    session
        .configure_for_readout(1, 1, false, AdcMode::Msb)
        .unwrap();
    let mut pixels = [0u16; 8];
    assert!(matches!(
        session.read_line(&mut pixels, 0),
        Err(Error::Stalled { .. })
    ));
    assert_eq!(session.state(), State::Reading);
    let retry = session.read_line(&mut pixels, 0);
    match tolerance {
        LineTolerance::Armed => assert!(matches!(
            retry,
            Err(Error::State {
                actual: State::Reading,
                ..
            })
        )),
        LineTolerance::ArmedOrReading => {
            assert!(matches!(retry, Err(Error::Stalled { .. })))
        }
    }
}

#[test]
fn stalled_words_are_pushed_out_with_filler() {
    let (emulator, mut session) = common::session(8, Trailer::Crc);
    emulator.stall(1, 3);
    session
        .configure_for_readout(3, 2, true, AdcMode::Msb)
        .unwrap();
    let mut image = vec![0u16; 3 * 2 * 8];
    assert_eq!(session.read_image(3, 2, 8, &mut image).unwrap(), 0);
    assert!(emulator.filler_words() >= 8);
    assert_eq!(emulator.filler_words() % 8, 0);
    assert_pattern(&image, 3, 16, true);
}

#[test]
fn configuration_decodes_from_bincode() {
    let mut configuration = pfs_ccd_drivers::Configuration::default();
    configuration.trailer = Trailer::CrcAndRow;
    configuration.timing.parallel = 800;
    let data = pfs_ccd_drivers::bincode::serialize(&configuration).unwrap();
    assert_eq!(
        pfs_ccd_drivers::Configuration::deserialize_bincode(&data).unwrap(),
        configuration
    );
    assert_eq!(pfs_ccd_drivers::PROPERTIES.pixels(), 4300 * 552 * 8);
    let port = pfs_ccd_drivers::PortConfiguration::default();
    assert_eq!(
        port.resource_path(),
        "/sys/bus/pci/devices/0000:03:00.0/resource0"
    );
}

#[test]
fn peek_and_poke_reach_the_registers() {
    let (emulator, mut session) = common::session(8, Trailer::Crc);
    emulator.set_id(0x0000_0070);
    assert_eq!(session.peek(Id::ADDRESS).unwrap(), 0x70);
    assert_eq!(
        session.fpga_version().unwrap().adc_generation(),
        Some(AdcGeneration::Old)
    );
    session.poke(0x18, 0x40).unwrap();
    assert_eq!(session.peek(0x18).unwrap(), 0x40);
    assert!(matches!(
        session.peek(0x5c),
        Err(Error::OutOfBounds { offset: 0x5c, .. })
    ));
}
