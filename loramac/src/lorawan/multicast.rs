//! Multicast groups
//!
//! Groups are kept in link order in a fixed-capacity list and looked up by
//! address when a downlink does not match the device address.

use heapless::Vec;

use crate::config::device::{AESKey, DevAddr};
use crate::lorawan::mac::MacError;

/// Maximum number of linked multicast groups
pub const MAX_MULTICAST_CHANNELS: usize = 4;

/// Multicast group session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulticastChannel {
    /// Group address
    pub address: DevAddr,
    /// Group network session key
    pub nwk_skey: AESKey,
    /// Group application session key
    pub app_skey: AESKey,
    /// Last accepted downlink counter
    pub downlink_counter: u32,
}

impl MulticastChannel {
    /// New group with a zero downlink counter
    pub fn new(address: DevAddr, nwk_skey: AESKey, app_skey: AESKey) -> Self {
        Self {
            address,
            nwk_skey,
            app_skey,
            downlink_counter: 0,
        }
    }
}

/// Linked multicast groups in link order
#[derive(Debug, Default)]
pub struct MulticastList {
    channels: Vec<MulticastChannel, MAX_MULTICAST_CHANNELS>,
}

impl MulticastList {
    /// Empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a group; an address can be linked once
    pub fn link(&mut self, channel: MulticastChannel) -> Result<(), MacError> {
        if self.find(channel.address).is_some() {
            return Err(MacError::ParameterInvalid);
        }
        self.channels.push(channel).map_err(|_| MacError::BufferFull)
    }

    /// Remove the group with `address`, keeping the order of the others
    pub fn unlink(&mut self, address: DevAddr) -> Result<MulticastChannel, MacError> {
        let index = self
            .channels
            .iter()
            .position(|channel| channel.address == address)
            .ok_or(MacError::ParameterInvalid)?;
        Ok(self.channels.remove(index))
    }

    /// Group with `address`
    pub fn find(&self, address: DevAddr) -> Option<&MulticastChannel> {
        self.channels.iter().find(|channel| channel.address == address)
    }

    /// Mutable group with `address`
    pub fn find_mut(&mut self, address: DevAddr) -> Option<&mut MulticastChannel> {
        self.channels.iter_mut().find(|channel| channel.address == address)
    }

    /// Groups in link order
    pub fn iter(&self) -> impl Iterator<Item = &MulticastChannel> {
        self.channels.iter()
    }

    /// Zero every downlink counter
    pub fn reset_counters(&mut self) {
        for channel in self.channels.iter_mut() {
            channel.downlink_counter = 0;
        }
    }

    /// Number of groups
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// No group linked
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlink_keeps_link_order() {
        let mut list = MulticastList::new();
        for address in [0x10, 0x20, 0x30] {
            list.link(MulticastChannel::new(address, [0; 16], [1; 16])).unwrap();
        }
        assert_eq!(list.unlink(0x20).unwrap().address, 0x20);
        let order: heapless::Vec<DevAddr, 4> = list.iter().map(|c| c.address).collect();
        assert_eq!(order.as_slice(), &[0x10, 0x30]);
        assert_eq!(list.unlink(0x20), Err(MacError::ParameterInvalid));
    }

    #[test]
    fn duplicate_and_overflow_are_refused() {
        let mut list = MulticastList::new();
        list.link(MulticastChannel::new(1, [0; 16], [0; 16])).unwrap();
        assert_eq!(
            list.link(MulticastChannel::new(1, [0; 16], [0; 16])),
            Err(MacError::ParameterInvalid)
        );
        for address in 2..=MAX_MULTICAST_CHANNELS as u32 {
            list.link(MulticastChannel::new(address, [0; 16], [0; 16])).unwrap();
        }
        assert_eq!(
            list.link(MulticastChannel::new(99, [0; 16], [0; 16])),
            Err(MacError::BufferFull)
        );
    }
}
