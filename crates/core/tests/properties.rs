//! Property tests for pacing, timestamps and buffer hand-off.

mod common;

use common::{Harness, h264_clip, h264_clip_sized};
use proptest::prelude::*;
use psrtp::TickOutcome;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn sends_are_paced(steps in prop::collection::vec(0u64..100, 1..200), speed in 0.25f64..8.0) {
        let mut h = Harness::new(&h264_clip(300, 25, 32));
        h.session.set_speed(speed).unwrap();
        h.session.play();

        let due = 40.0 / speed;
        let mut now = 0u64;
        let mut last_sent: Option<u64> = None;
        for step in steps {
            match h.session.tick().unwrap() {
                TickOutcome::FrameSent => {
                    if let Some(last) = last_sent {
                        prop_assert!((now - last) as f64 >= due);
                    }
                    last_sent = Some(now);
                }
                TickOutcome::NotYet => {
                    let last = last_sent.expect("NotYet only after a send");
                    prop_assert!(((now - last) as f64) < due);
                }
                other => prop_assert!(false, "unexpected {:?}", other),
            }
            h.advance(step);
            now += step;
        }
    }

    #[test]
    fn rtp_timestamps_follow_wall_clock(steps in prop::collection::vec(1u64..120, 1..100)) {
        let mut h = Harness::new(&h264_clip(200, 10, 32));
        h.session.play();

        let mut now = 0u64;
        let mut expected = Vec::new();
        for step in steps {
            if h.session.tick().unwrap() == TickOutcome::FrameSent {
                expected.push((now * 90) as u32);
            }
            h.advance(step);
            now += step;
        }
        let ts = h.transport.frame_timestamps();
        prop_assert_eq!(&ts, &expected);
        prop_assert!(ts.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn buffers_round_trip(sizes in prop::collection::vec(8usize..6_000, 1..40)) {
        let mut h = Harness::new(&h264_clip_sized(&sizes, 8));
        h.session.play();
        for _ in 0..sizes.len() {
            prop_assert_eq!(h.session.tick().unwrap(), TickOutcome::FrameSent);
            h.advance(40);
        }

        let stats = h.session.stats();
        prop_assert_eq!(stats.frames_sent, sizes.len() as u64);
        prop_assert_eq!(stats.mux_buffers_allocated, stats.frames_sent);
        prop_assert_eq!(stats.mux_buffers_released, stats.mux_buffers_allocated);
        prop_assert_eq!(stats.packet_checkouts, stats.packets_sent);

        let packets = h.transport.rtp_packets();
        prop_assert_eq!(packets.len() as u64, stats.packets_sent);
        prop_assert!(packets.iter().all(|p| p.len() <= 1434));
        prop_assert_eq!(h.transport.ps_buffers().len(), sizes.len());
    }
}
