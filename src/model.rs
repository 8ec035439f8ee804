//! The adaptive order-2 PPM model: 256 per-context frequency tables plus an
//! order-0 fallback, keyed by the low byte of a rolling two-symbol history.

/// Alphabet size: packed symbols `0..=255` plus the escape symbol `256`.
pub const FREQ_N: usize = 257;
/// The escape symbol, always the last slot of a [`Context`]'s frequency table.
pub const FREQ_END: usize = FREQ_N - 1;
/// Number of order-2 contexts (order-0 lives outside this array, see
/// [`PpmModel::order0`]).
pub const CONTEXTS_MAX: usize = FREQ_END;
/// Frequency cap that triggers a rescale. Chosen to match the reference
/// implementation exactly — any implementation that wants byte-identical
/// output must use this constant verbatim.
pub const FREQ_MAX: u16 = (FREQ_N as u16) * 4;

/// One 257-entry frequency table plus its running sum.
#[derive(Debug, Clone)]
pub struct Context {
    pub freq: [u16; FREQ_N],
    pub sum: u32,
}

impl Context {
    const fn zeroed() -> Self {
        Context {
            freq: [0; FREQ_N],
            sum: 0,
        }
    }

    fn order0() -> Self {
        Context {
            freq: [1; FREQ_N],
            sum: FREQ_N as u32,
        }
    }

    /// `freq[symbol] += 2; sum += 2`, rescaling when the symbol's frequency
    /// exceeds [`FREQ_MAX`]: every zero entry stays zero, every entry `<= 2`
    /// becomes 1, and every larger entry becomes `(f + 3) >> 2`.
    pub fn update(&mut self, symbol: usize) {
        self.freq[symbol] += 2;
        self.sum += 2;

        if self.freq[symbol] > FREQ_MAX {
            log::debug!("rescaling frequency table: freq[{symbol}] exceeded {FREQ_MAX}, sum was {}", self.sum);
            self.sum = 0;
            for f in self.freq.iter_mut() {
                if *f == 0 {
                    continue;
                }
                *f = if *f <= 2 { 1 } else { (*f + 3) >> 2 };
                self.sum += u32::from(*f);
            }
        }
    }

    /// Cumulative frequency of every symbol strictly below `symbol`.
    fn cumulative_below(&self, symbol: usize) -> u32 {
        self.freq[..symbol].iter().map(|&f| u32::from(f)).sum()
    }
}

/// The full per-call model state: 256 order-2 contexts plus the order-0
/// fallback. Heap-allocated (`Box`) since it's ~148 KB — too large to want
/// on the stack, and this crate never keeps it alive past one encode/decode
/// call (see spec.md §5/§9 on reentrancy).
pub struct PpmModel {
    contexts: Box<[Context]>,
    order0: Context,
    context_id: u32,
}

/// What to do with a packed symbol: emit/consume it directly from its order-2
/// context, or fall back (possibly via an escape) to the order-0 table.
pub enum Coding {
    /// The context already knows this symbol; no escape needed.
    Direct { low: u32, high: u32, scale: u32 },
    /// The context had to escape (or was empty); the escape's probability
    /// range is `Some` only when an actual escape symbol was coded.
    Fallback {
        escape: Option<(u32, u32, u32)>,
        low: u32,
        high: u32,
        scale: u32,
    },
}

impl PpmModel {
    pub fn new() -> Self {
        PpmModel {
            contexts: vec![Context::zeroed(); CONTEXTS_MAX].into_boxed_slice(),
            order0: Context::order0(),
            context_id: 0,
        }
    }

    fn current_context_index(&self) -> usize {
        (self.context_id % CONTEXTS_MAX as u32) as usize
    }

    /// Determines how `symbol` should be coded against the current context,
    /// and applies the corresponding frequency-table update. Returns the
    /// `(low, high, scale)` ranges the caller must feed to the arithmetic
    /// coder, in the order they must be encoded (escape range first, if any).
    pub fn code_symbol(&mut self, symbol: u8) -> Coding {
        let idx = self.current_context_index();
        let symbol = symbol as usize;
        let context_sum = self.contexts[idx].sum;

        let result = if context_sum != 0 && self.contexts[idx].freq[symbol] != 0 {
            let ctx = &mut self.contexts[idx];
            let low = ctx.cumulative_below(symbol);
            let high = low + u32::from(ctx.freq[symbol]);
            ctx.update(symbol);
            Coding::Direct {
                low,
                high,
                scale: context_sum,
            }
        } else {
            let escape = if context_sum != 0 {
                let ctx = &mut self.contexts[idx];
                let low = ctx.cumulative_below(FREQ_END);
                let high = low + u32::from(ctx.freq[FREQ_END]);
                let range = (low, high, context_sum);
                ctx.freq[FREQ_END] += 1;
                ctx.sum += 1;
                Some(range)
            } else {
                None
            };

            let low = self.order0.cumulative_below(symbol);
            let high = low + u32::from(self.order0.freq[symbol]);
            let scale = self.order0.sum;

            let ctx = &mut self.contexts[idx];
            if context_sum == 0 {
                ctx.freq[FREQ_END] = 1;
                ctx.sum = 1;
            }
            ctx.freq[symbol] = 1;
            ctx.sum += 1;
            self.order0.update(symbol);

            Coding::Fallback {
                escape,
                low,
                high,
                scale,
            }
        };

        self.context_id = (self.context_id << 8) | symbol as u32;
        result
    }

    /// Scale to feed the arithmetic decoder for the current context (or the
    /// order-0 table's scale if the context is empty).
    pub fn current_scale(&self) -> u32 {
        let idx = self.current_context_index();
        let sum = self.contexts[idx].sum;
        if sum != 0 {
            sum
        } else {
            self.order0.sum
        }
    }

    /// Whether the current context has ever coded a symbol.
    pub fn context_is_live(&self) -> bool {
        self.contexts[self.current_context_index()].sum != 0
    }

    /// Finds the symbol whose cumulative range in the current context
    /// contains `target`, scanning only `0..max_symbol` plus the escape slot.
    /// Returns `(symbol, low, high)`. A returned symbol of [`FREQ_END`] means
    /// "escape": the caller must then decode from the order-0 table.
    pub fn find_in_context(&self, target: u32, max_symbol: usize) -> (usize, u32, u32) {
        let idx = self.current_context_index();
        let ctx = &self.contexts[idx];
        let mut accum = 0u32;
        for s in 0..max_symbol {
            let f = u32::from(ctx.freq[s]);
            if f != 0 {
                if accum + f > target {
                    return (s, accum, accum + f);
                }
                accum += f;
            }
        }
        (FREQ_END, accum, accum + u32::from(ctx.freq[FREQ_END]))
    }

    /// Finds the symbol whose cumulative range in the order-0 table contains
    /// `target`. Returns `(symbol, low, high)`.
    pub fn find_in_order0(&self, target: u32, max_symbol: usize) -> (usize, u32, u32) {
        let mut accum = 0u32;
        for s in 0..max_symbol {
            let f = u32::from(self.order0.freq[s]);
            accum += f;
            if accum > target {
                return (s, accum - f, accum);
            }
        }
        unreachable!("order-0 table always sums to at least max_symbol entries of weight 1")
    }

    /// Applies the state transition for a symbol decoded directly from the
    /// current (non-empty) context.
    pub fn apply_direct(&mut self, symbol: usize) {
        let idx = self.current_context_index();
        self.contexts[idx].update(symbol);
        self.context_id = (self.context_id << 8) | symbol as u32;
    }

    /// Applies the escape bookkeeping (`freq[FREQ_END] += 1; sum += 1`)
    /// without advancing the context id (the decoder still has to resolve
    /// the real symbol from order-0 afterward).
    pub fn apply_escape(&mut self) {
        let idx = self.current_context_index();
        let ctx = &mut self.contexts[idx];
        ctx.freq[FREQ_END] += 1;
        ctx.sum += 1;
    }

    /// Applies the state transition for a symbol resolved via the order-0
    /// fallback table (after an escape, or because the context was empty).
    pub fn apply_fallback(&mut self, symbol: usize) {
        let idx = self.current_context_index();
        let ctx = &mut self.contexts[idx];
        if ctx.sum == 0 {
            ctx.freq[FREQ_END] = 1;
            ctx.sum = 1;
        }
        ctx.freq[symbol] = 1;
        ctx.sum += 1;
        self.order0.update(symbol);
        self.context_id = (self.context_id << 8) | symbol as u32;
    }
}

impl Default for PpmModel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order0_starts_uniform() {
        let model = PpmModel::new();
        assert_eq!(model.order0.sum, FREQ_N as u32);
        assert!(model.order0.freq.iter().all(|&f| f == 1));
    }

    #[test]
    fn order2_contexts_start_empty() {
        let model = PpmModel::new();
        for ctx in model.contexts.iter() {
            assert_eq!(ctx.sum, 0);
        }
    }

    #[test]
    fn rescale_preserves_zero_entries_and_recomputes_sum() {
        let mut ctx = Context::zeroed();
        ctx.freq[5] = 1;
        ctx.freq[10] = 1;
        ctx.sum = 2;
        // Drive freq[10] past FREQ_MAX to force a rescale.
        while ctx.freq[10] <= FREQ_MAX {
            ctx.update(10);
        }
        let expected_sum: u32 = ctx.freq.iter().map(|&f| u32::from(f)).sum();
        assert_eq!(ctx.sum, expected_sum);
        // freq[5] was never touched and was nonzero before rescale, so it
        // must still be nonzero afterward.
        assert!(ctx.freq[5] > 0);
        // Entries that were zero before a rescale remain zero.
        assert_eq!(ctx.freq[0], 0);
    }

    #[test]
    fn repeated_symbol_becomes_context_hit_after_first_fallback() {
        let mut model = PpmModel::new();
        // Symbol 0 keeps context_id at 0 across the transition
        // ((0 << 8) | 0 == 0), so the second call lands back in the same
        // context that the first call just seeded.
        match model.code_symbol(0) {
            Coding::Fallback { .. } => {}
            Coding::Direct { .. } => panic!("first symbol in a fresh context must fall back"),
        }
        match model.code_symbol(0) {
            Coding::Direct { .. } => {}
            Coding::Fallback { .. } => panic!("second occurrence should hit the context directly"),
        }
    }
}
