/// Apply another macro to all tuple combinations from `A` to a chosen arity, recursively
/// shrinking the list by one element each pass.
#[macro_export]
macro_rules! for_every_tuple {
    ($m:ident !! $head_ty:ident) => {
        $m!($head_ty);
    };
    ($m:ident !! $head_ty:ident, $($tail_ty:ident),*) => (
        $m!($head_ty, $( $tail_ty ),*);
        $crate::for_every_tuple!($m !! $( $tail_ty ),*);
    );
}

/// Apply a macro to all tuple combinations from arity 1 through 16.
///
/// Sixteen components on one entity comfortably covers every realistic call site; callers
/// that need more can always nest tuples.
#[macro_export]
macro_rules! all_tuples {
    ($m:ident) => {
        $crate::for_every_tuple!($m !! A, B, C, D, E, F, G, H, I, J, K, L, M, N, O, P);
    };
}
