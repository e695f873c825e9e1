use std::fmt;

use messages::{CommandPacket, Frame, FrameError};

/// Running counts of what the simulated vehicle has received.
#[derive(Debug, Default)]
pub struct Tally {
    pub accepted: u64,
    pub rejected: u64,
    pub last: Option<CommandPacket>,
    peak_thrust: u16,
}

impl Tally {
    pub fn record(&mut self, datagram: &[u8]) -> Result<CommandPacket, FrameError> {
        match Frame::decode(datagram) {
            Ok(packet) => {
                self.accepted += 1;
                self.peak_thrust = self.peak_thrust.max(packet.thrust);
                self.last = Some(packet);
                Ok(packet)
            }
            Err(e) => {
                self.rejected += 1;
                Err(e)
            }
        }
    }
}

impl fmt::Display for Tally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} frames accepted, {} rejected, peak thrust {}",
            self.accepted, self.rejected, self.peak_thrust)?;
        if let Some(last) = &self.last {
            write!(f, ", last roll {} pitch {} yaw {} thrust {}",
                last.roll, last.pitch, last.yaw, last.thrust)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use messages::ControlSample;

    #[test]
    fn counts_good_and_bad_frames() {
        let mut tally = Tally::default();
        let frame = messages::encode(&ControlSample { thrust: 1200.0, ..ControlSample::stop() }, true);

        assert!(tally.record(frame.as_bytes()).is_ok());
        assert!(tally.record(&frame.as_bytes()[..10]).is_err());

        let mut corrupt = *frame.as_bytes();
        corrupt[3] ^= 0xff;
        assert!(matches!(tally.record(&corrupt), Err(FrameError::Checksum { .. })));

        assert_eq!(tally.accepted, 1);
        assert_eq!(tally.rejected, 2);
        assert_eq!(tally.last.map(|p| p.thrust), Some(1200));
        assert!(tally.to_string().starts_with("1 frames accepted, 2 rejected, peak thrust 1200"));
    }
}
