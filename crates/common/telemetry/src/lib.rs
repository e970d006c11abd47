// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Telemetry utilities for haul: structured logging built on the tracing
//! ecosystem (stdout and rotating file outputs, runtime-reloadable filters)
//! and an enhanced panic hook with backtraces and a panic counter.

pub mod logging;
pub mod panic_hook;
