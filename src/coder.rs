//! The finite-precision binary arithmetic coder.
//!
//! 24-bit code values, 14-bit probability resolution, 32-bit-wide `low`/
//! `range` registers so `low + range` cannot overflow during renormalization.
//! Encoder and decoder must perform identical integer arithmetic in the same
//! order: this is a bit-stream format, not a loose probability model.

/// Probability resolution: frequencies and their sums must never exceed this.
pub const PROB_MAX: u32 = 1 << 14;
/// Width of the coder's code value, in bits.
pub const CODE_BITS: u32 = 24;
/// Largest representable code value (`2^24 - 1`).
pub const CODE_MAX: u32 = (1 << CODE_BITS) - 1;

/// A `(low, high, scale)` cumulative-frequency triple ready to be fed to the
/// arithmetic coder: the symbol occupies `[low, high)` out of `scale`.
pub type Prob = (u32, u32, u32);

/// Encoder half of the coder. Owns the output byte buffer.
pub struct Encoder {
    low: u32,
    range: u32,
    out: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Encoder {
            low: 0,
            range: u32::MAX,
            out: Vec::new(),
        }
    }

    /// Narrows `[low, low+range)` to the sub-range `prob` describes, then
    /// renormalizes, emitting bytes as the range allows.
    pub fn encode(&mut self, prob: Prob) {
        let (plo, phi, scale) = prob;
        self.range /= scale;
        self.low = self.low.wrapping_add(plo.wrapping_mul(self.range));
        self.range = self.range.wrapping_mul(phi - plo);
        self.normalize();
    }

    fn normalize(&mut self) {
        loop {
            if (self.low ^ self.low.wrapping_add(self.range)) >= CODE_MAX {
                if self.range < PROB_MAX {
                    self.range = PROB_MAX - (self.low & (PROB_MAX - 1));
                } else {
                    break;
                }
            }

            let byte = (self.low >> 24) as u8;
            self.low <<= 8;
            self.range <<= 8;
            self.out.push(byte);
        }
    }

    /// Flushes the final four bytes of `low` and returns the encoded stream.
    pub fn finish(mut self) -> Vec<u8> {
        for _ in 0..4 {
            let byte = (self.low >> 24) as u8;
            self.low <<= 8;
            self.out.push(byte);
        }
        self.out
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decoder half of the coder. Reads from a borrowed input slice, zero-padding
/// once the input is exhausted.
pub struct Decoder<'a> {
    input: &'a [u8],
    pos: usize,
    low: u32,
    range: u32,
    code: u32,
}

impl<'a> Decoder<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        let mut decoder = Decoder {
            input,
            pos: 0,
            low: 0,
            range: u32::MAX,
            code: 0,
        };
        for _ in 0..4 {
            decoder.code = (decoder.code << 8) | u32::from(decoder.next_byte());
        }
        decoder
    }

    fn next_byte(&mut self) -> u8 {
        let byte = self.input.get(self.pos).copied().unwrap_or(0);
        self.pos += 1;
        byte
    }

    /// Computes the cumulative-frequency target for the given `scale`; the
    /// caller scans its frequency table to find the symbol whose range
    /// contains it, then calls [`Decoder::consume`] with that symbol's prob.
    #[must_use]
    pub fn target(&self, scale: u32) -> u32 {
        let step = self.range / scale;
        self.code.wrapping_sub(self.low) / step
    }

    /// Mirrors the encoder's narrow-and-renormalize step for the symbol the
    /// caller just resolved from `target`.
    pub fn consume(&mut self, prob: Prob) {
        let (plo, phi, scale) = prob;
        let step = self.range / scale;
        self.low = self.low.wrapping_add(step.wrapping_mul(plo));
        self.range = step.wrapping_mul(phi - plo);
        self.normalize();
    }

    fn normalize(&mut self) {
        loop {
            if (self.low ^ self.low.wrapping_add(self.range)) >= CODE_MAX {
                if self.range < PROB_MAX {
                    self.range = PROB_MAX - (self.low & (PROB_MAX - 1));
                } else {
                    break;
                }
            }

            let byte = self.next_byte();
            self.code = (self.code << 8) | u32::from(byte);
            self.range <<= 8;
            self.low <<= 8;
        }
    }
}
