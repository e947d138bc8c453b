use wasm_bindgen::prelude::*;

#[wasm_bindgen]
pub struct Counter {
    value: u32,
}

#[wasm_bindgen]
impl Counter {
    #[wasm_bindgen(constructor)]
    pub fn new() -> Counter {
        Counter { value: 0 }
    }

    pub fn step(&mut self) -> u32 {
        self.value += 1;
        self.value
    }
}
