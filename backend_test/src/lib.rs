use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{parse_macro_input, spanned::Spanned, FnArg, Ident, ItemFn, Pat, Signature, Type};

/// Transform an asynchronous test into a synchronous one, inject dependencies,
/// and ensure that the terminal is locked regardless of how the test terminates.
///
/// Injectable dependencies are [`rocket::local::asynchronous::Client`],
/// [`crate::store::MemoryStore`] and [`crate::terminal::Terminal`]. The server
/// runs over a fresh `MemoryStore` seeded with the demo election.
///
/// `#[backend_test(voter)]` unlocks the terminal for voter `V1` and waits for
/// the first office before the test starts.
#[proc_macro_attribute]
pub fn backend_test(args: TokenStream, input: TokenStream) -> TokenStream {
    let mut item_fn = parse_macro_input!(input as ItemFn);

    // Extract type information and reject invalid function signatures.
    let test_args = match check_sig(item_fn.sig.clone()) {
        Ok(args) => args,
        Err(err) => {
            return err.into_compile_error().into();
        }
    };

    // Rename the future so the test can have its original name.
    let name = item_fn.sig.ident.clone();
    let new_name = format_ident!("{}_fut", name);
    item_fn.sig.ident = new_name.clone();

    // Unlock the terminal for a voter if needed.
    let maybe_unlock = match parse_macro_input!(args as Option<Ident>) {
        Some(arg) if arg == "voter" => quote! {
            // The response borrows the client, so keep it in its own scope.
            {
                let response = rocket_client
                    .post("/terminal/unlock")
                    .header(rocket::http::ContentType::JSON)
                    .body(rocket::serde::json::json!({ "voter_id": "V1" }).to_string())
                    .dispatch()
                    .await;
                assert_eq!(response.status(), rocket::http::Status::Ok);
            }

            rocket::tokio::time::timeout(
                std::time::Duration::from_secs(5),
                terminal.wait_for(|status| {
                    status.state == crate::terminal::SessionState::AwaitingDigits { office: 0 }
                }),
            )
            .await
            .expect("terminal did not reach the first office");
        },
        Some(arg) => {
            return syn::Error::new(arg.span(), "Expected `voter` or nothing")
                .into_compile_error()
                .into();
        }
        None => quote! {},
    };

    // Rewrite the test function.
    quote! {
        #[test]
        fn #name() {
            /// Test setup.
            async fn setup() -> (
                rocket::local::asynchronous::Client,
                crate::store::MemoryStore,
                crate::terminal::Terminal,
            ) {
                log4rs_test_utils::test_logging::init_logging_once_for(["urna_backend"], None, None);

                let store = crate::store::MemoryStore::demo();
                let rocket_client = rocket::local::asynchronous::Client::tracked(crate::rocket_for_store(store.clone()))
                    .await
                    .unwrap();
                let terminal = rocket_client
                    .rocket()
                    .state::<crate::terminal::Terminal>()
                    .unwrap()
                    .clone();

                #maybe_unlock

                (rocket_client, store, terminal)
            }

            /// The test itself.
            #item_fn

            /// Test cleanup.
            async fn cleanup(terminal: crate::terminal::Terminal) {
                terminal.lock();
            }

            // Create an async runtime. We need a separate one for inside and
            // outside the `catch_unwind`.
            let outer_runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("test-setup-cleanup")
                .worker_threads(1)
                .enable_all()
                .build()
                .unwrap();
            let inner_runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("rocket-worker-test-thread")
                .worker_threads(1)
                .enable_all()
                .build()
                .unwrap();

            // Run the setup.
            let (rocket_client, store, terminal) = outer_runtime.block_on(setup());

            // Run the test, catching any panics.
            // Use mutexes to safely transfer `!UnwindSafe` data.
            let client_mutex = std::sync::Mutex::new(rocket_client);
            let store_mutex = std::sync::Mutex::new(store);
            let terminal_mutex = std::sync::Mutex::new(terminal.clone());
            let runtime_mutex = std::sync::Mutex::new(inner_runtime);
            let result = std::panic::catch_unwind(|| {
                #[allow(unused_variables)]
                let rocket_client = client_mutex.into_inner().unwrap();
                #[allow(unused_variables)]
                let store = store_mutex.into_inner().unwrap();
                #[allow(unused_variables)]
                let terminal = terminal_mutex.into_inner().unwrap();
                let runtime = runtime_mutex.into_inner().unwrap();

                runtime.block_on(#new_name(#(#test_args),*));
            });

            // Run the cleanup.
            outer_runtime.block_on(cleanup(terminal));

            // If the test panicked, re-raise the panic.
            if let Err(cause) = result {
                std::panic::panic_any(cause);
            }
        }
    }
    .into()
}

/// Ensure the wrapped test is async, extract parameters to inject, and reject unknown parameters.
fn check_sig(sig: Signature) -> Result<Vec<TokenStream2>, syn::Error> {
    if sig.asyncness.is_none() {
        return Err(syn::Error::new(sig.span(), "Test must be marked `async`"));
    }

    let mut args = vec![];
    let mut seen: Vec<String> = vec![];

    for input in &sig.inputs {
        if let FnArg::Typed(pat_type) = input {
            if let (Pat::Ident(_), Type::Path(type_path)) = (&*pat_type.pat, &*pat_type.ty) {
                if let Some(type_ident) = type_path.path.segments.last().map(|s| &s.ident) {
                    let injected = if type_ident == "Client" {
                        Some(quote! { rocket_client })
                    } else if type_ident == "MemoryStore" {
                        Some(quote! { store })
                    } else if type_ident == "Terminal" {
                        Some(quote! { terminal })
                    } else {
                        None
                    };
                    if let Some(injected) = injected {
                        let type_name = type_ident.to_string();
                        if seen.contains(&type_name) {
                            return Err(syn::Error::new(
                                input.span(),
                                format!("Test cannot accept more than one `{type_name}`"),
                            ));
                        }
                        seen.push(type_name);
                        args.push(injected);
                        continue;
                    }
                }
            }
        }

        return Err(syn::Error::new(
            input.span(),
            "Expected one of `client_ident: Client`, `store_ident: MemoryStore` or `terminal_ident: Terminal`",
        ));
    }

    Ok(args)
}
