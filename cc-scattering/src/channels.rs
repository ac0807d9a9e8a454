use serde::{Deserialize, Serialize};

/// Single coupled internal state of the atom-diatom system.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub total_j: u32,
    pub j: u32,
    pub v: u32,
    pub l: u32,
    pub parity: i32,
    pub index: u32,
    /// Asymptotic channel energy in hartree
    pub threshold: f64,
}

impl Channel {
    /// Channel is open only strictly above its threshold.
    pub fn is_open(&self, energy: f64) -> bool {
        self.threshold < energy
    }

    pub fn centrifugal(&self) -> f64 {
        let l = self.l as f64;

        l * (l + 1.)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelBasis {
    channels: Vec<Channel>,
}

impl ChannelBasis {
    pub fn new(channels: Vec<Channel>) -> Self {
        Self { channels }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn is_open(&self, energy: f64) -> Vec<bool> {
        self.channels.iter().map(|c| c.is_open(energy)).collect()
    }

    pub fn open_count(&self, energy: f64) -> usize {
        self.channels.iter().filter(|c| c.is_open(energy)).count()
    }

    pub fn thresholds(&self) -> Vec<f64> {
        self.channels.iter().map(|c| c.threshold).collect()
    }
}

impl FromIterator<Channel> for ChannelBasis {
    fn from_iter<I: IntoIterator<Item = Channel>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod test {
    use super::{Channel, ChannelBasis};

    fn channel(index: u32, l: u32, threshold: f64) -> Channel {
        Channel {
            total_j: 0,
            j: 0,
            v: index,
            l,
            parity: 1,
            index,
            threshold,
        }
    }

    #[test]
    fn test_open_channels() {
        let basis: ChannelBasis = [channel(0, 0, 0.), channel(1, 2, 1e-3), channel(2, 1, 5e-3)]
            .into_iter()
            .collect();

        assert_eq!(basis.len(), 3);
        assert_eq!(basis.open_count(2e-3), 2);
        assert_eq!(basis.is_open(2e-3), vec![true, true, false]);
        assert_eq!(basis.thresholds(), vec![0., 1e-3, 5e-3]);

        // exactly at threshold counts as closed
        assert_eq!(basis.open_count(1e-3), 1);
        assert_eq!(basis.open_count(-1.), 0);

        assert_eq!(basis.channels()[1].centrifugal(), 6.);
    }
}
