use antrabms_lib::coordinator::Coordinator;
use antrabms_lib::protocol::{build_frame, EOI};
use antrabms_lib::tokio_serial_async::AntraBMS;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

const HEADER: &str = concat!(
    "15A5", "FFF6", "01A4", "0190", "0060", "00A0", "0096", "0E2A", "0D1A", "0082", "0050",
    "000000000000000000", "10", "02"
);

fn battery_block(wire_number: u8, cell_mv: u16) -> String {
    let mut block = format!("{wire_number:02X}00");
    block += "60"; // SOC 96
    block += "14C8";
    block += "10";
    block += &format!("{cell_mv:04X}").repeat(16);
    block += "00DC00E600F0";
    block += "04";
    block += &"00D2".repeat(4);
    block += "FE0C"; // -5.00 A
    block += "00100062"; // internal resistance, SOH
    block += "2A"; // user defined
    block += "13881388002A0D050CFB"; // 50.00 Ah full and remaining, cycles, cell extremes
    block += "00F000C80000000000DC";
    block += "0D0000000000";
    block += "00000002000000000003";
    block += "00000000000000000000";
    block
}

fn analog_reply(info: &str) -> Vec<u8> {
    build_frame(0x22, 0x00, 0x4A, 0x00, 0x1000 | info.len() as u16, info)
}

async fn serve(bms: &mut DuplexStream, replies: &[&[u8]]) {
    while bms.read_u8().await.unwrap() != EOI {}
    for reply in replies {
        bms.write_all(reply).await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn poll_cycle_through_a_noisy_bus() {
    let (client, mut bms) = tokio::io::duplex(8192);
    let coordinator = Coordinator::new(AntraBMS::from_stream(client), 2);
    let updates = coordinator.subscribe();

    let info = format!("{HEADER}{}{}", battery_block(0, 3300), battery_block(1, 3310));
    let reply = analog_reply(&info);
    let polling = build_frame(0x22, 0x03, 0x4A, 0x42, 0xE002, "03");
    let refused = build_frame(0x22, 0x00, 0x4A, 0x06, 0x1008, "0102030405060708");

    let replies: [&[u8]; 3] = [&polling, &refused, &reply];
    let (snapshot, _) = tokio::join!(coordinator.refresh(), serve(&mut bms, &replies));
    let snapshot = snapshot.expect("first cycle succeeds");

    assert_eq!(snapshot.group.voltage, 55.41);
    assert_eq!(snapshot.group.current, -10.0);
    assert_eq!(snapshot.group.remaining_capacity, 400);
    assert_eq!(snapshot.group.battery_count, 2);
    assert!(snapshot.is_complete());

    let second = snapshot.battery(2).expect("battery 2");
    assert_eq!(second.number, 2);
    assert_eq!(second.soc, 96);
    assert_eq!(second.cell_voltages, vec![3.31; 16]);
    assert_eq!(second.pack_temperatures, vec![21.0; 4]);
    assert_eq!(second.current, -5.0);
    assert_eq!(second.full_capacity, 50.0);
    assert_eq!(second.status.current_flags(), ["Discharging"]);
    assert!(second.status.fet_status().charge_mos);

    assert_eq!(
        updates.borrow().as_ref().map(|s| s.group.soc),
        Some(snapshot.group.soc)
    );

    // the BMS goes quiet, the published snapshot stays
    let (stale, _) = tokio::join!(coordinator.refresh(), serve(&mut bms, &[]));
    assert_eq!(stale.expect("previous snapshot"), snapshot);
}

#[tokio::test(start_paused = true)]
async fn corrupted_battery_is_reported_not_fatal() {
    let (client, mut bms) = tokio::io::duplex(8192);
    let coordinator = Coordinator::new(AntraBMS::from_stream(client), 2);

    let broken = battery_block(0, 3300).replacen("14C810", "14C8FF", 1);
    let info = format!("{HEADER}{broken}{}", battery_block(1, 3310));
    let reply = analog_reply(&info);

    let replies: [&[u8]; 1] = [&reply];
    let (snapshot, _) = tokio::join!(coordinator.try_refresh(), serve(&mut bms, &replies));
    let snapshot = snapshot.expect("header decodes");
    assert_eq!(snapshot.failed_batteries, [1]);
    assert_eq!(snapshot.batteries.len(), 1);
    assert_eq!(snapshot.battery(2).unwrap().number, 2);
}
