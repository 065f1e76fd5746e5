//! Context-triggered piecewise hashing, compatible with ssdeep signatures

use std::fmt;

const ROLLING_WINDOW: usize = 7;
const MIN_BLOCKSIZE: u32 = 3;
const HASH_PRIME: u32 = 0x0100_0193;
const HASH_INIT: u32 = 0x2802_1967;
const SPAMSUM_LENGTH: usize = 64;

const B64: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// `blocksize:sig1:sig2` signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spamsum {
    pub block_size: u32,
    pub sig1: String,
    pub sig2: String,
}

impl fmt::Display for Spamsum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.block_size, self.sig1, self.sig2)
    }
}

#[derive(Default)]
struct Roll {
    window: [u8; ROLLING_WINDOW],
    h1: u32,
    h2: u32,
    h3: u32,
    n: usize,
}

impl Roll {
    fn push(&mut self, c: u8) -> u32 {
        let c32 = u32::from(c);
        let slot = self.n % ROLLING_WINDOW;

        self.h2 = self.h2.wrapping_sub(self.h1);
        self.h2 = self.h2.wrapping_add((ROLLING_WINDOW as u32).wrapping_mul(c32));

        self.h1 = self.h1.wrapping_add(c32);
        self.h1 = self.h1.wrapping_sub(u32::from(self.window[slot]));

        self.window[slot] = c;
        self.n += 1;

        self.h3 = self.h3.wrapping_shl(5);
        self.h3 ^= c32;

        self.h1.wrapping_add(self.h2).wrapping_add(self.h3)
    }
}

fn sum_hash(c: u8, h: u32) -> u32 {
    h.wrapping_mul(HASH_PRIME) ^ u32::from(c)
}

/// Signature of `data` at the smallest block size that fills it
pub fn spamsum(data: &[u8]) -> Spamsum {
    let mut block_size = MIN_BLOCKSIZE;
    while (block_size as usize) * SPAMSUM_LENGTH < data.len() {
        block_size *= 2;
    }

    loop {
        let (sig1, sig2) = digest_at(data, block_size);
        if block_size > MIN_BLOCKSIZE && sig1.len() < SPAMSUM_LENGTH / 2 {
            block_size /= 2;
            continue;
        }
        return Spamsum {
            block_size,
            sig1,
            sig2,
        };
    }
}

fn digest_at(data: &[u8], block_size: u32) -> (String, String) {
    let double = block_size.wrapping_mul(2);
    let mut roll = Roll::default();
    let mut h = HASH_INIT;
    let mut h2 = HASH_INIT;
    let mut sig1 = [0u8; SPAMSUM_LENGTH];
    let mut sig2 = [0u8; SPAMSUM_LENGTH / 2];
    let mut j = 0;
    let mut k = 0;

    for &c in data {
        h = sum_hash(c, h);
        h2 = sum_hash(c, h2);
        let rolled = roll.push(c);

        if rolled % block_size == block_size - 1 {
            sig1[j] = B64[(h % 64) as usize];
            if j < SPAMSUM_LENGTH - 1 {
                h = HASH_INIT;
                j += 1;
            }
        }
        if rolled % double == double - 1 {
            sig2[k] = B64[(h2 % 64) as usize];
            if k < SPAMSUM_LENGTH / 2 - 1 {
                h2 = HASH_INIT;
                k += 1;
            }
        }
    }

    if h != HASH_INIT {
        sig1[j] = B64[(h % 64) as usize];
        j += 1;
    }
    if h2 != HASH_INIT {
        sig2[k] = B64[(h2 % 64) as usize];
        k += 1;
    }

    let text = |bytes: &[u8]| bytes.iter().map(|&b| char::from(b)).collect::<String>();
    (text(&sig1[..j]), text(&sig2[..k]))
}

/// Fuzzy hasher with size limits
#[derive(Debug, Clone, Copy)]
pub struct FuzzyHasher {
    min_size: usize,
    window: usize,
}

impl Default for FuzzyHasher {
    fn default() -> Self {
        Self::new(128, 10 * 1024)
    }
}

impl FuzzyHasher {
    /// Inputs below `min_size` are not hashed; inputs of at least
    /// `2 * window` bytes are reduced to their first and last `window` bytes
    pub fn new(min_size: usize, window: usize) -> Self {
        Self { min_size, window }
    }

    pub fn hash(&self, data: &[u8]) -> Option<Spamsum> {
        if data.len() < self.min_size {
            return None;
        }
        if self.window > 0 && data.len() >= self.window * 2 {
            let mut reduced = Vec::with_capacity(self.window * 2);
            reduced.extend_from_slice(&data[..self.window]);
            reduced.extend_from_slice(&data[data.len() - self.window..]);
            return Some(spamsum(&reduced));
        }
        Some(spamsum(data))
    }
}
