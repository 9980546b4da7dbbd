//! The list of kernel variants a tuning or check run compares.

use spmv_core::{slot, Kernel, MatrixKind, MatrixVariant, DEFAULT_LOOP_LENGTH};

use crate::variant::{Coverage, VariantRecord};

/// Optional kernel families to include besides the always-available ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogueOptions {
    /// Include the thread-numbered native variant.
    pub threaded: bool,
    /// Include the accelerated variants of the row-compressed kinds.
    pub accelerated: bool,
}

struct Entry {
    name: &'static str,
    kind: MatrixKind,
    exclude_diag: Coverage,
    loop_length: usize,
    scalar: Option<Kernel>,
    block: Option<Kernel>,
}

impl Entry {
    fn new(name: &'static str, kind: MatrixKind, scalar: Option<Kernel>, block: Option<Kernel>) -> Self {
        Self {
            name,
            kind,
            exclude_diag: Coverage::Both,
            loop_length: 0,
            scalar,
            block,
        }
    }

    fn loop_length(mut self, loop_length: usize) -> Self {
        self.loop_length = loop_length;
        self
    }

    fn with_diagonal_only(mut self) -> Self {
        self.exclude_diag = Coverage::Without;
        self
    }

    fn into_record(self, symmetry: Coverage, blocks: Coverage) -> VariantRecord {
        let mut variant = MatrixVariant::new(self.name, self.kind);
        variant.loop_length = self.loop_length;
        for (block, kernel) in [(false, self.scalar), (true, self.block)] {
            if !blocks.allows(block) {
                continue;
            }
            for &exclude_diag in self.exclude_diag.values() {
                variant.kernels[slot(block, exclude_diag)] = kernel;
            }
        }
        VariantRecord::new(variant, symmetry)
    }
}

/// Builds the variants to compare for the given symmetry and block coverage.
///
/// The first variant is always the native baseline, used as reference.
/// Symmetric-storage kinds are only listed when `symmetry` is
/// [`Coverage::Only`].
pub fn build_variant_list(
    symmetry: Coverage,
    blocks: Coverage,
    options: CatalogueOptions,
) -> Vec<VariantRecord> {
    use Kernel as K;
    use MatrixKind as M;

    let mut entries = vec![
        Entry::new("Native, baseline", M::Native, Some(K::Native), Some(K::NativeBlock)),
        Entry::new("Native, 3x3 blocks", M::Native, None, Some(K::Native3x3)),
        Entry::new("Native, Bull algorithm", M::Native, Some(K::NativeBull), None)
            .loop_length(DEFAULT_LOOP_LENGTH),
        Entry::new("Native, vector", M::Native, Some(K::NativeVector), None),
    ];
    if options.threaded {
        entries.push(Entry::new(
            "Native, threaded",
            M::Native,
            Some(K::NativeThreaded),
            Some(K::NativeBlockThreaded),
        ));
    }

    entries.push(Entry::new("CSR", M::Csr, Some(K::Csr), None));
    entries.push(
        Entry::new("CSR, with prefetch", M::Csr, Some(K::CsrPrefetch), None)
            .loop_length(DEFAULT_LOOP_LENGTH)
            .with_diagonal_only(),
    );
    if options.accelerated {
        entries.push(
            Entry::new("CSR, accelerated", M::Csr, Some(K::CsrAccelerated), None)
                .with_diagonal_only(),
        );
    }
    if symmetry == Coverage::Only {
        entries.push(Entry::new("CSR_SYM", M::CsrSym, Some(K::CsrSym), None));
        if options.accelerated {
            entries.push(
                Entry::new(
                    "CSR_SYM, accelerated",
                    M::CsrSym,
                    Some(K::CsrSymAccelerated),
                    None,
                )
                .with_diagonal_only(),
            );
        }
    }

    entries.push(Entry::new("MSR", M::Msr, Some(K::Msr), Some(K::MsrBlock)));
    entries.push(
        Entry::new("MSR, with prefetch", M::Msr, Some(K::MsrPrefetch), None)
            .loop_length(DEFAULT_LOOP_LENGTH),
    );
    if options.accelerated {
        entries.push(Entry::new(
            "MSR, accelerated",
            M::Msr,
            Some(K::MsrAccelerated),
            None,
        ));
    }
    if symmetry == Coverage::Only {
        entries.push(Entry::new("MSR_SYM", M::MsrSym, Some(K::MsrSym), None));
        if options.accelerated {
            entries.push(Entry::new(
                "MSR_SYM, accelerated",
                M::MsrSym,
                Some(K::MsrSymAccelerated),
                None,
            ));
        }
    }

    entries
        .into_iter()
        .map(|e| e.into_record(symmetry, blocks))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[VariantRecord]) -> Vec<&str> {
        list.iter().map(|v| v.name()).collect()
    }

    #[test]
    fn test_symmetric_kinds_only_for_symmetric_runs() {
        let both = build_variant_list(Coverage::Both, Coverage::Without, CatalogueOptions::default());
        assert!(!names(&both).contains(&"CSR_SYM"));
        assert!(!names(&both).contains(&"MSR_SYM"));

        let sym = build_variant_list(Coverage::Only, Coverage::Without, CatalogueOptions::default());
        assert!(names(&sym).contains(&"CSR_SYM"));
        assert!(names(&sym).contains(&"MSR_SYM"));
        assert_eq!(sym[0].name(), "Native, baseline");
    }

    #[test]
    fn test_block_coverage_filters_kernels() {
        let list = build_variant_list(Coverage::Both, Coverage::Without, CatalogueOptions::default());
        assert!(list.iter().all(|v| !v.handles_block(true)));

        let list = build_variant_list(Coverage::Both, Coverage::Only, CatalogueOptions::default());
        assert!(list.iter().all(|v| !v.handles_block(false)));
        let three = list.iter().find(|v| v.name() == "Native, 3x3 blocks").map(|v| v.kernel(true, true));
        assert_eq!(three, Some(Some(Kernel::Native3x3)));
    }

    #[test]
    fn test_prefetch_csr_has_no_exdiag_kernel() {
        let list = build_variant_list(Coverage::Both, Coverage::Both, CatalogueOptions::default());
        let pf = list
            .iter()
            .find(|v| v.name() == "CSR, with prefetch")
            .map(|v| (v.kernel(false, false), v.kernel(false, true), v.variant.loop_length));
        assert_eq!(pf, Some((Some(Kernel::CsrPrefetch), None, DEFAULT_LOOP_LENGTH)));
    }

    #[test]
    fn test_optional_families() {
        let opts = CatalogueOptions {
            threaded: true,
            accelerated: true,
        };
        let list = build_variant_list(Coverage::Without, Coverage::Without, opts);
        let n = names(&list);
        assert!(n.contains(&"Native, threaded"));
        assert!(n.contains(&"CSR, accelerated"));
        assert!(n.contains(&"MSR, accelerated"));
        assert!(!names(&build_variant_list(
            Coverage::Without,
            Coverage::Without,
            CatalogueOptions::default()
        ))
        .contains(&"Native, threaded"));
        assert!(!n.contains(&"CSR_SYM, accelerated"));
    }

    #[test]
    fn test_accelerated_symmetric_variants() {
        let opts = CatalogueOptions {
            threaded: false,
            accelerated: true,
        };
        let list = build_variant_list(Coverage::Only, Coverage::Without, opts);
        let find = |name: &str| list.iter().find(|v| v.name() == name);

        let csr = find("CSR_SYM, accelerated").map(|v| (v.kind(), v.kernel(false, false), v.kernel(false, true)));
        assert_eq!(csr, Some((MatrixKind::CsrSym, Some(Kernel::CsrSymAccelerated), None)));

        let msr = find("MSR_SYM, accelerated").map(|v| (v.kind(), v.kernel(false, true)));
        assert_eq!(msr, Some((MatrixKind::MsrSym, Some(Kernel::MsrSymAccelerated))));

        let plain = build_variant_list(Coverage::Only, Coverage::Without, CatalogueOptions::default());
        assert!(!names(&plain).contains(&"MSR_SYM, accelerated"));
    }
}
