//! Full device lifecycle: connect, stream, stop, disconnect, with exact
//! state-callback accounting and live data delivery.

use std::sync::Arc;

use neuro_core::types::{DeviceState, SamplePacket};
use neuro_device::device::Device;
use neuro_device::{SyntheticConfig, SyntheticDevice};
use parking_lot::Mutex;

#[tokio::test]
async fn connect_stream_stop_disconnect() {
    let device = SyntheticDevice::new(SyntheticConfig {
        packet_interval_ms: 20,
        ..Default::default()
    });

    let states: Arc<Mutex<Vec<DeviceState>>> = Arc::new(Mutex::new(Vec::new()));
    let state_sink = Arc::clone(&states);
    device.set_state_callback(Arc::new(move |s| state_sink.lock().push(s)));

    let packets: Arc<Mutex<Vec<SamplePacket>>> = Arc::new(Mutex::new(Vec::new()));
    let packet_sink = Arc::clone(&packets);
    device.set_data_callback(Arc::new(move |p| packet_sink.lock().push(p)));

    assert!(device.connect().await.unwrap());
    device.start_streaming("session-1").await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    device.stop_streaming().await.unwrap();
    device.disconnect().await.unwrap();

    // One callback per edge, in lifecycle order.
    assert_eq!(
        states.lock().as_slice(),
        &[
            DeviceState::Connecting,
            DeviceState::Connected,
            DeviceState::Streaming,
            DeviceState::Connected,
            DeviceState::Disconnected,
        ]
    );

    let packets = packets.lock();
    assert!(!packets.is_empty(), "data callback fired while streaming");
    for packet in packets.iter() {
        assert_eq!(packet.session_id(), "session-1");
        assert_eq!(packet.channels().len(), 4);
        assert!(packet.n_samples() > 0);
        assert!(packet.sampling_rate_hz() > 0.0);
    }
}

#[tokio::test]
async fn double_start_is_rejected_without_corrupting_state() {
    let device = SyntheticDevice::new(SyntheticConfig::default());
    device.connect().await.unwrap();
    device.start_streaming("s").await.unwrap();

    assert!(device.start_streaming("s").await.is_err());
    assert_eq!(device.state(), DeviceState::Streaming);

    device.stop_streaming().await.unwrap();
    device.disconnect().await.unwrap();
    assert_eq!(device.state(), DeviceState::Disconnected);
}
