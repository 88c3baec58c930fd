use proc_macro::TokenStream;
use quote::quote;
use syn::{parse, parse_macro_input, DeriveInput};

#[proc_macro_derive(RegisterSerde)]
/// Derived on a 4-byte packed_struct so it can be written to and read from a 32-bit register
pub fn derive_register_serde(tokens: TokenStream) -> TokenStream {
    let input = parse_macro_input!(tokens as DeriveInput);
    let block_name = input.ident;
    let generated = quote! {
        impl Serialize for #block_name {
            fn serialize(&self) -> Result<u32, PackingError> {
                Ok(u32::from_be_bytes(self.pack()?))
            }
        }

        impl Deserialize for #block_name {
            fn deserialize(word: u32) -> Result<Self, PackingError> {
                Self::unpack(&word.to_be_bytes())
            }
        }
    };
    TokenStream::from(generated)
}

#[proc_macro_attribute]
/// Attach the register byte address a packed register struct lives at
pub fn address(attr: TokenStream, item: TokenStream) -> TokenStream {
    let num = match parse::<syn::Lit>(attr) {
        Ok(syn::Lit::Int(v)) => v,
        _ => {
            return syn::Error::new(
                proc_macro2::Span::call_site(),
                "The address must be a literal integer",
            )
            .to_compile_error()
            .into()
        }
    };
    // Get the struct name this address is for
    let item = parse_macro_input!(item as DeriveInput);
    let ident = item.clone().ident;

    let generated = quote! {
        impl Address for #ident {
            const ADDR: u32 = #num;
        }
        #item
    };
    TokenStream::from(generated)
}
