//! Bit-flag helpers for role and state masks

/// Set operations over an integer used as a bit set.
///
/// `exists` is true only when every bit of `mask` is present.
pub trait Modifier: Copy {
    fn attach(self, mask: Self) -> Self;
    fn detach(self, mask: Self) -> Self;
    fn exists(self, mask: Self) -> bool;
}

macro_rules! impl_modifier {
    ($($t:ty),*) => {
        $(
            impl Modifier for $t {
                #[inline]
                fn attach(self, mask: Self) -> Self {
                    self | mask
                }

                #[inline]
                fn detach(self, mask: Self) -> Self {
                    self & !mask
                }

                #[inline]
                fn exists(self, mask: Self) -> bool {
                    self & mask == mask
                }
            }
        )*
    };
}

impl_modifier!(u8, u16, u32, u64, usize);
