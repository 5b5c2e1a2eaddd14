//! Tests for publishing and restoring the Lambda environment.
//!
//! Every test here touches process-wide state, so they run serially.

mod common;

use common::started_server_with;
use lambda_test_server::{LAMBDA_ENVIRONMENT_VARIABLES, ServerOptions};
use serial_test::serial;
use std::env;
use temp_env::async_with_vars;

#[tokio::test]
#[serial]
async fn start_publishes_and_dispose_restores() {
    async_with_vars(
        [
            ("AWS_LAMBDA_FUNCTION_NAME", Some("outer-function")),
            ("AWS_LAMBDA_RUNTIME_API", None),
            ("_HANDLER", Some("outer-handler")),
            ("AWS_LAMBDA_LOG_GROUP_NAME", None),
            ("AWS_LAMBDA_DOTNET_DISABLE_MEMORY_LIMIT_CHECK", None),
        ],
        async {
            let options = ServerOptions::builder()
                .function_name("published-function")
                .function_handler("MyAssembly::MyNamespace.Function::Handler")
                .function_memory_size(512)
                .function_version("42")
                .log_group_name("/aws/lambda/published-function")
                .log_stream_name("2024/01/01/[42]abcdef")
                .build();
            let server = started_server_with(options).await;
            let addr = server.addr().unwrap();

            assert_eq!(env::var("AWS_LAMBDA_RUNTIME_API").unwrap(), addr.to_string());
            assert_eq!(
                env::var("AWS_LAMBDA_FUNCTION_NAME").unwrap(),
                "published-function"
            );
            assert_eq!(env::var("AWS_LAMBDA_FUNCTION_MEMORY_SIZE").unwrap(), "512");
            assert_eq!(env::var("AWS_LAMBDA_FUNCTION_VERSION").unwrap(), "42");
            assert_eq!(
                env::var("AWS_LAMBDA_LOG_GROUP_NAME").unwrap(),
                "/aws/lambda/published-function"
            );
            assert_eq!(
                env::var("AWS_LAMBDA_LOG_STREAM_NAME").unwrap(),
                "2024/01/01/[42]abcdef"
            );
            assert_eq!(
                env::var("_HANDLER").unwrap(),
                "MyAssembly::MyNamespace.Function::Handler"
            );
            assert!(env::var_os("AWS_LAMBDA_DOTNET_DISABLE_MEMORY_LIMIT_CHECK").is_none());

            server.dispose();

            assert_eq!(
                env::var("AWS_LAMBDA_FUNCTION_NAME").unwrap(),
                "outer-function"
            );
            assert_eq!(env::var("_HANDLER").unwrap(), "outer-handler");
            assert!(env::var_os("AWS_LAMBDA_RUNTIME_API").is_none());
            assert!(env::var_os("AWS_LAMBDA_LOG_GROUP_NAME").is_none());
        },
    )
    .await;
}

#[tokio::test]
#[serial]
async fn memory_limit_check_flag_is_published() {
    async_with_vars(
        [("AWS_LAMBDA_DOTNET_DISABLE_MEMORY_LIMIT_CHECK", None::<&str>)],
        async {
            let server = started_server_with(
                ServerOptions::builder()
                    .disable_memory_limit_check(true)
                    .build(),
            )
            .await;

            assert_eq!(
                env::var("AWS_LAMBDA_DOTNET_DISABLE_MEMORY_LIMIT_CHECK").unwrap(),
                "true"
            );

            drop(server);
            assert!(env::var_os("AWS_LAMBDA_DOTNET_DISABLE_MEMORY_LIMIT_CHECK").is_none());
        },
    )
    .await;
}

#[tokio::test]
#[serial]
async fn publication_can_be_disabled() {
    let cleared = LAMBDA_ENVIRONMENT_VARIABLES.map(|key| (key, None::<&str>));
    async_with_vars(cleared, async {
        let server = started_server_with(
            ServerOptions::builder().publish_environment(false).build(),
        )
        .await;

        for key in LAMBDA_ENVIRONMENT_VARIABLES {
            assert!(env::var_os(key).is_none(), "{key} was published");
        }

        let vars = server.lambda_env_vars().unwrap();
        assert_eq!(vars["AWS_LAMBDA_RUNTIME_API"], server.addr().unwrap().to_string());
        assert_eq!(vars["AWS_LAMBDA_FUNCTION_NAME"], "test-function");
    })
    .await;
}
