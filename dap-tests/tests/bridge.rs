use dap_engine::sequencer::SWD_BRING_UP;
use dap_engine::sim::{Faults, SIM_IDCODE};
use dap_tests::{PACKET_SIZE, connect, exchange, spawn_bridge};
use pretty_assertions::assert_eq;

fn packet(prefix: &[u8]) -> Vec<u8> {
    let mut data = prefix.to_vec();
    data.resize(PACKET_SIZE, 0);
    data
}

#[tokio::test]
async fn reports_packet_size() {
    let bridge = spawn_bridge(Faults::default(), false).unwrap();
    let mut client = connect(bridge.addr).await.unwrap();

    let response = exchange(&mut client, &[0x00, 0xFF]).await.unwrap();
    assert_eq!(response, packet(&[0x00, 0x02, 0x40, 0x00]));

    let response = exchange(&mut client, &[0x00, 0x02]).await.unwrap();
    let mut expected = vec![0x00, 10];
    expected.extend_from_slice(b"Test Probe");
    assert_eq!(response, packet(&expected));
}

#[tokio::test]
async fn connect_and_disconnect_swd() {
    let bridge = spawn_bridge(Faults::default(), false).unwrap();
    let mut client = connect(bridge.addr).await.unwrap();

    let response = exchange(&mut client, &[0x02, 0x01]).await.unwrap();
    assert_eq!(response, packet(&[0x02, 0x01]));
    assert_eq!(bridge.recorder.line_writes(), vec![SWD_BRING_UP.to_vec()]);

    let response = exchange(&mut client, &[0x03]).await.unwrap();
    assert_eq!(response, packet(&[0x03, 0x00]));
}

#[tokio::test]
async fn failed_connect_reports_disabled_port() {
    let bridge = spawn_bridge(
        Faults {
            fail_line_write: true,
            ..Faults::default()
        },
        false,
    )
    .unwrap();
    let mut client = connect(bridge.addr).await.unwrap();

    let response = exchange(&mut client, &[0x02, 0x02]).await.unwrap();
    assert_eq!(response, packet(&[0x02, 0x00]));

    bridge.faults.set(Faults::default());
    let response = exchange(&mut client, &[0x02, 0x02]).await.unwrap();
    assert_eq!(response, packet(&[0x02, 0x02]));
}

#[tokio::test]
async fn unsupported_commands() {
    let bridge = spawn_bridge(Faults::default(), false).unwrap();
    let mut client = connect(bridge.addr).await.unwrap();

    for command in [0x0B, 0x17, 0x1F, 0x80, 0xFF] {
        let response = exchange(&mut client, &[command]).await.unwrap();
        assert_eq!(response, packet(&[0xFF]), "command 0x{:02x}", command);
    }
    let response = exchange(&mut client, &[0x05, 0x00, 0x01, 0x02]).await.unwrap();
    assert_eq!(response, packet(&[0x05, 0x00, 0x08]));
}

#[tokio::test]
async fn batched_commands() {
    let bridge = spawn_bridge(Faults::default(), false).unwrap();
    let mut client = connect(bridge.addr).await.unwrap();

    let request = [0x7F, 0x03, 0x02, 0x01, 0x13, 0x00, 0x00, 0xFE];
    let response = exchange(&mut client, &request).await.unwrap();
    assert_eq!(
        response,
        packet(&[0x7F, 0x03, 0x02, 0x01, 0x13, 0x00, 0x00, 0x01, 0x01])
    );
}

#[tokio::test]
async fn reads_idcode_from_simulated_target() {
    let bridge = spawn_bridge(Faults::default(), true).unwrap();
    let mut client = connect(bridge.addr).await.unwrap();

    exchange(&mut client, &[0x02, 0x01]).await.unwrap();
    let response = exchange(&mut client, &[0x05, 0x00, 0x01, 0x02]).await.unwrap();
    let mut expected = vec![0x05, 0x01, 0x01];
    expected.extend_from_slice(&SIM_IDCODE.to_le_bytes());
    assert_eq!(response, packet(&expected));
}

#[tokio::test]
async fn new_client_starts_disconnected() {
    let bridge = spawn_bridge(Faults::default(), true).unwrap();
    {
        let mut client = connect(bridge.addr).await.unwrap();
        let response = exchange(&mut client, &[0x02, 0x01]).await.unwrap();
        assert_eq!(response, packet(&[0x02, 0x01]));
    }

    let mut client = connect(bridge.addr).await.unwrap();
    let response = exchange(&mut client, &[0x05, 0x00, 0x01, 0x02]).await.unwrap();
    assert_eq!(response, packet(&[0x05, 0x00, 0x80]));
}
