// IPv4 CIDR ranges as 32-bit integer intervals

use crate::error::CidrError;
use ipnet::Ipv4Net;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// A canonical IPv4 network: the host bits of the address are always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cidr(Ipv4Net);

impl Cidr {
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self, CidrError> {
        let net = Ipv4Net::new(addr, prefix)
            .map_err(|_| CidrError::InvalidCidr(format!("{}/{}", addr, prefix)))?;
        Self::from_net(net)
    }

    fn from_net(net: Ipv4Net) -> Result<Self, CidrError> {
        if net.trunc() != net {
            return Err(CidrError::HostBitsSet(net.to_string()));
        }
        Ok(Self(net))
    }

    pub fn network(&self) -> Ipv4Addr {
        self.0.network()
    }

    pub fn prefix(&self) -> u8 {
        self.0.prefix_len()
    }

    /// First address as an integer.
    pub fn start(&self) -> u32 {
        u32::from(self.0.network())
    }

    /// Last address as an integer.
    pub fn end(&self) -> u32 {
        u32::from(self.0.broadcast())
    }

    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix()))
    }

    /// True when `other` lies entirely within this range, including equality.
    pub fn contains(&self, other: &Cidr) -> bool {
        other.start() >= self.start() && other.end() <= self.end()
    }

    pub fn contains_addr(&self, addr: Ipv4Addr) -> bool {
        (self.start()..=self.end()).contains(&u32::from(addr))
    }

    /// Every subnet of this range at `new_prefix`, in address order.
    pub fn subnets(&self, new_prefix: u8) -> Result<Vec<Cidr>, CidrError> {
        let invalid = CidrError::InvalidSubdivision {
            prefix: self.prefix(),
            new_prefix,
        };
        if new_prefix < self.prefix() || new_prefix > 32 {
            return Err(invalid);
        }
        let subnets = self.0.subnets(new_prefix).map_err(|_| invalid)?;
        Ok(subnets.map(Cidr).collect())
    }

    /// The two halves at `prefix + 1`, or None for a single address.
    pub fn halves(&self) -> Option<(Cidr, Cidr)> {
        if self.prefix() == 32 {
            return None;
        }
        let child_prefix = self.prefix() + 1;
        let step = 1u32 << (32 - u32::from(child_prefix));
        let low = Cidr(Ipv4Net::new(self.network(), child_prefix).ok()?);
        let high = Cidr(Ipv4Net::new(Ipv4Addr::from(self.start() + step), child_prefix).ok()?);
        Some((low, high))
    }
}

impl FromStr for Cidr {
    type Err = CidrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let net: Ipv4Net = s
            .trim()
            .parse()
            .map_err(|_| CidrError::InvalidCidr(s.to_string()))?;
        Self::from_net(net)
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network(), self.prefix())
    }
}

impl Serialize for Cidr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Cidr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cidr(s: &str) -> Cidr {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_and_bounds() {
        let net = cidr("10.0.0.0/16");
        assert_eq!(net.prefix(), 16);
        assert_eq!(net.start(), u32::from(Ipv4Addr::new(10, 0, 0, 0)));
        assert_eq!(net.end(), u32::from(Ipv4Addr::new(10, 0, 255, 255)));
        assert_eq!(net.size(), 65536);
        assert_eq!(net.to_string(), "10.0.0.0/16");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(matches!("10.0.0.0".parse::<Cidr>(), Err(CidrError::InvalidCidr(_))));
        assert!(matches!("10.0.0.0/33".parse::<Cidr>(), Err(CidrError::InvalidCidr(_))));
        assert!(matches!("300.0.0.0/8".parse::<Cidr>(), Err(CidrError::InvalidCidr(_))));
        assert!(matches!("10.0.0.1/24".parse::<Cidr>(), Err(CidrError::HostBitsSet(_))));
    }

    #[test]
    fn test_containment_is_inclusive() {
        let parent = cidr("10.0.0.0/16");
        assert!(parent.contains(&parent));
        assert!(parent.contains(&cidr("10.0.255.0/24")));
        assert!(!parent.contains(&cidr("10.1.0.0/24")));
        assert!(!cidr("10.0.1.0/24").contains(&parent));
        assert!(parent.contains_addr(Ipv4Addr::new(10, 0, 3, 4)));
    }

    #[test]
    fn test_halves() {
        let (low, high) = cidr("10.0.0.0/16").halves().unwrap();
        assert_eq!(low, cidr("10.0.0.0/17"));
        assert_eq!(high, cidr("10.0.128.0/17"));
        assert!(cidr("10.0.0.1/32").halves().is_none());
    }

    #[test]
    fn test_subnets() {
        let quarters = cidr("192.168.0.0/24").subnets(26).unwrap();
        let expected: Vec<Cidr> = ["192.168.0.0/26", "192.168.0.64/26", "192.168.0.128/26", "192.168.0.192/26"]
            .iter()
            .map(|s| cidr(s))
            .collect();
        assert_eq!(quarters, expected);

        assert_eq!(
            cidr("192.168.0.0/24").subnets(23),
            Err(CidrError::InvalidSubdivision {
                prefix: 24,
                new_prefix: 23
            })
        );
        assert!(cidr("192.168.0.0/24").subnets(33).is_err());
    }
}
