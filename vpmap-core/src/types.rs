#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

macro_rules! gen_ops {
    (@gen_op $type:ident, $underlying:ident, $opTrait:ident, $opFn: ident, $op:tt) =>
    {
        impl<T: Into<$underlying>> std::ops::$opTrait<T> for $type {
            type Output = $type;

            fn $opFn(self, rhs: T) -> Self::Output {
                $type(self.0 $op rhs.into())
            }
        }
    };
    (@gen_op_assign $type:ident, $underlying:ident, $opTrait:ident, $opFn: ident, $op: tt) =>
    {
        impl<T: Into<$underlying>> std::ops::$opTrait<T> for $type {
            fn $opFn(&mut self, rhs: T) {
                self.0 $op rhs.into()
            }
        }
    };
    ($type:ident, $underlying:ident) => {
        gen_ops!(@gen_op $type, $underlying, Add, add, +);
        gen_ops!(@gen_op_assign $type, $underlying, AddAssign, add_assign, +=);
        gen_ops!(@gen_op $type, $underlying, Sub, sub, -);
        gen_ops!(@gen_op_assign $type, $underlying, SubAssign, sub_assign, -=);
    };
}

macro_rules! wrap_numeric {
    ($newtype: ident, $underlying: ident, $($c:tt)+) => {
        #[doc = stringify!($($c)+)]
        #[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
        #[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $newtype(pub $underlying);

        impl From<$newtype> for $underlying {
            fn from(value: $newtype) -> Self {
                value.0
            }
        }

        impl From<$underlying> for $newtype {
            fn from(value: $underlying) -> Self {
                $newtype(value)
            }
        }

        gen_ops!($newtype, $underlying);

        impl std::fmt::LowerHex for $newtype {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::LowerHex::fmt(&self.0, f)
            }
        }

        impl std::fmt::Display for $newtype {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }
    }
}

wrap_numeric!(Pfn, u64, "A physical page frame number");
wrap_numeric!(Vpn, u64, "A virtual page number: a virtual address divided by the page size");

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn test_pfn_ops() {
        let p = Pfn(0x10);
        let mut p2 = p + 4u64;
        assert!(p2 == 0x14u64.into());

        let formatted = format!("{}", p2);
        assert_eq!(formatted, "0x14");
        p2 -= 0x14u64;
        assert_eq!(u64::from(p2), 0);
        assert_eq!(format!("{:08x}", Vpn(0x7f12)), "00007f12");
    }
}
