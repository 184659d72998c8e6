use clap::ValueEnum;
use codefam_registry::{view, CodeFamily, RegistrySnapshot};

#[derive(Copy, Clone, Debug, Default, ValueEnum)]
pub(crate) enum FamilyScope {
    /// Families observed more than once
    #[default]
    Recurring,
    /// Every family, singletons included
    All,
}

impl FamilyScope {
    pub(crate) fn select(self, snapshot: &RegistrySnapshot) -> Vec<&CodeFamily> {
        match self {
            FamilyScope::Recurring => view::recurring_families(snapshot),
            FamilyScope::All => view::all_families(snapshot),
        }
    }
}
