//! # Resource test harness
//!
//! The same black-box scenarios run against every transport. A transport suite only
//! supplies how to build a [`CrudResourceTest`] (a [`DataProvider`] plus a
//! [`CrudClient`](crate::client_trait::CrudClient)); [`crud_resource_tests!`](crate::crud_resource_tests)
//! turns each scenario into its own `#[tokio::test]`:
//!
//! ```rust,ignore
//! async fn rest_suite() -> CrudResourceTest<Sample, SampleDataProvider, RestClient<Sample>> {
//!     let system = SampleSystem::new(ResourceConfig::for_domain("sample"));
//!     CrudResourceTest::new(system.data_provider(), system.rest_client())
//! }
//!
//! crud_framework::crud_resource_tests!(rest, rest_suite());
//! // generates rest_save, rest_save_mandatory, ..., rest_count_all
//! ```
//!
//! Pass an explicit scenario list after a `;` to generate only some of them.

mod provider;
mod resource_test;

pub use provider::DataProvider;
pub use resource_test::CrudResourceTest;

#[macro_export]
macro_rules! crud_resource_tests {
    ($prefix:ident, $setup:expr; $($scenario:ident),+ $(,)?) => {
        $crate::__private::paste::paste! {
            $(
                #[tokio::test]
                async fn [<$prefix _ $scenario>]() {
                    let suite = $setup.await;
                    if let Err(error) = suite.$scenario().await {
                        panic!("{} failed: {}", stringify!($scenario), error);
                    }
                }
            )+
        }
    };
    ($prefix:ident, $setup:expr) => {
        $crate::crud_resource_tests!(
            $prefix, $setup;
            save,
            save_mandatory,
            save_many,
            update,
            update_by_id,
            update_many,
            delete,
            delete_by_id,
            delete_many,
            delete_all,
            edit,
            edit_by_id,
            edit_by_id_empty_patch,
            edit_many,
            get_one,
            get_by_id,
            get_by_id_after_delete,
            get_many,
            get_page,
            count,
            count_all,
        );
    };
}
